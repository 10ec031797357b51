//! Per-connector session state machine.
//!
//! Each tick polls the host inputs, drives the transaction lifecycle
//! (begin → authorize → start → stop), infers the OCPP status and queues
//! `StatusNotification` through the debounce filter.

use tracing::{debug, info, warn};

use crate::config;
use crate::config::ConfigValue;
use crate::operations::operation::{Operation, Request};
use crate::operations::types::{ChargePointStatus, Reason};
use crate::support::clock;

use super::metering::ConnectorMetering;
use super::transaction::{Transaction, METER_UNDEFINED};
use super::Services;

// ── Host-facing I/O types ──────────────────────────────────────

pub type BoolInput = Box<dyn FnMut() -> bool>;
pub type ErrorCodeInput = Box<dyn FnMut() -> Option<String>>;

/// Result of polling the host's unlock actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStatus {
    Pending,
    Unlocked,
    UnlockFailed,
}

pub type UnlockCallback = Box<dyn FnMut() -> UnlockStatus>;

/// Request towards a transaction-gating peripheral (connector lock,
/// transaction-scoped meter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxTrigger {
    Active,
    Inactive,
}

/// Peripheral answer; `Pending` keeps the session in its current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEnableState {
    Active,
    Inactive,
    Pending,
}

pub type TxIoCallback = Box<dyn FnMut(TxTrigger) -> TxEnableState>;

/// Session events surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxNotification {
    Authorized,
    AuthorizationRejected,
    AuthorizationTimeout,
    ConnectionTimeout,
    DeAuthorized,
    RemoteStart,
    RemoteStop,
    ReservationConflict,
    StartTx,
    StopTx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginTxError {
    /// A session already occupies this connector.
    Occupied,
    /// Reserved for another id tag.
    Reserved,
    /// No transaction slot left and silent fallback disabled.
    OutOfSlots,
}

struct InputSnapshot {
    plug: Option<bool>,
    ev_ready: bool,
    evse_ready: bool,
    occupied: bool,
    error_code: Option<String>,
}

fn availability_key(connector_id: u32) -> String {
    format!("ConnectorAvailability{connector_id}")
}

// ── Connector ──────────────────────────────────────────────────

pub struct Connector {
    id: u32,

    // Host inputs, polled each tick.
    plug_input: Option<BoolInput>,
    ev_ready_input: Option<BoolInput>,
    evse_ready_input: Option<BoolInput>,
    occupied_input: Option<BoolInput>,
    start_tx_ready_input: Option<BoolInput>,
    stop_tx_ready_input: Option<BoolInput>,
    error_code_inputs: Vec<ErrorCodeInput>,

    // Host outputs.
    unlock_output: Option<UnlockCallback>,
    tx_io: Vec<TxIoCallback>,

    // Availability.
    availability: bool,
    pub volatile_availability: bool,
    scheduled_availability: Option<bool>,

    // Status reporting.
    current_status: Option<ChargePointStatus>,
    status_since_ms: u64,
    reported_status: Option<ChargePointStatus>,
    fault_code: Option<String>,

    // Session.
    pub transaction: Option<Transaction>,
    plug_seen_since_begin: bool,
    prev_plug: bool,
    authorize_in_flight: bool,

    pub metering: ConnectorMetering,
}

impl Connector {
    pub fn new(id: u32, cfg: &mut crate::config::ConfigRegistry) -> Self {
        let key = availability_key(id);
        cfg.declare(&key, ConfigValue::Bool(true), true, false, true);
        let availability = cfg.bool(&key).unwrap_or(true);
        Self {
            id,
            plug_input: None,
            ev_ready_input: None,
            evse_ready_input: None,
            occupied_input: None,
            start_tx_ready_input: None,
            stop_tx_ready_input: None,
            error_code_inputs: Vec::new(),
            unlock_output: None,
            tx_io: Vec::new(),
            availability,
            volatile_availability: true,
            scheduled_availability: None,
            current_status: None,
            status_since_ms: 0,
            reported_status: None,
            fault_code: None,
            transaction: None,
            plug_seen_since_begin: false,
            prev_plug: false,
            authorize_in_flight: false,
            metering: ConnectorMetering::new(id),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    // ── Input/output wiring ────────────────────────────────

    pub fn set_plug_input(&mut self, cb: BoolInput) {
        self.plug_input = Some(cb);
    }

    pub fn set_ev_ready_input(&mut self, cb: BoolInput) {
        self.ev_ready_input = Some(cb);
    }

    pub fn set_evse_ready_input(&mut self, cb: BoolInput) {
        self.evse_ready_input = Some(cb);
    }

    pub fn set_occupied_input(&mut self, cb: BoolInput) {
        self.occupied_input = Some(cb);
    }

    pub fn set_start_tx_ready_input(&mut self, cb: BoolInput) {
        self.start_tx_ready_input = Some(cb);
    }

    pub fn set_stop_tx_ready_input(&mut self, cb: BoolInput) {
        self.stop_tx_ready_input = Some(cb);
    }

    pub fn add_error_code_input(&mut self, cb: ErrorCodeInput) {
        self.error_code_inputs.push(cb);
    }

    pub fn set_unlock_output(&mut self, cb: UnlockCallback) {
        self.unlock_output = Some(cb);
    }

    pub fn add_tx_io(&mut self, cb: TxIoCallback) {
        self.tx_io.push(cb);
    }

    // ── Availability ───────────────────────────────────────

    pub fn is_operative(&self) -> bool {
        self.availability && self.volatile_availability && self.fault_code.is_none()
    }

    /// `ChangeAvailability` entry point. Returns `true` when applied
    /// immediately, `false` when scheduled until the running transaction
    /// completes.
    pub fn set_availability(&mut self, sv: &mut Services, operative: bool) -> bool {
        let tx_running = self
            .transaction
            .as_ref()
            .map(|tx| !tx.is_completed())
            .unwrap_or(false);
        if tx_running && !operative {
            self.scheduled_availability = Some(false);
            return false;
        }
        self.apply_availability(sv, operative);
        true
    }

    fn apply_availability(&mut self, sv: &mut Services, operative: bool) {
        self.availability = operative;
        self.scheduled_availability = None;
        sv.config
            .set(&availability_key(self.id), ConfigValue::Bool(operative));
        sv.config.checkpoint();
    }

    // ── Session control ────────────────────────────────────

    /// Open a session for `id_tag`. With `pre_authorized`, no `Authorize`
    /// round trip is made (FreeVend, remote start without authorization).
    pub fn begin_transaction(
        &mut self,
        sv: &mut Services,
        id_tag: &str,
        pre_authorized: bool,
    ) -> Result<(), BeginTxError> {
        if self
            .transaction
            .as_ref()
            .map(|tx| !tx.is_completed())
            .unwrap_or(false)
        {
            return Err(BeginTxError::Occupied);
        }

        let now = sv.time.now();

        // Reservation gate: an unexpired reservation for somebody else
        // blocks the connector.
        let mut reservation_id = None;
        if let Some(res) = sv.reservations.active_for(self.id, now) {
            let parent = sv.auth.parent_id_tag(id_tag);
            if res.matches(id_tag, parent.as_deref()) {
                reservation_id = Some(res.reservation_id);
            } else {
                sv.notify(self.id, TxNotification::ReservationConflict);
                return Err(BeginTxError::Reserved);
            }
        }

        let mut tx = match sv.tx_store.create_transaction(self.id, id_tag) {
            Some(tx) => tx,
            None => {
                if sv.config.bool(config::SILENT_OFFLINE_TRANSACTIONS) == Some(true) {
                    info!(connector_id = self.id, "transaction journal full, starting silent session");
                    let mut tx = Transaction::new(u32::MAX, self.id, id_tag);
                    tx.silent = true;
                    tx.volatile = true;
                    tx
                } else {
                    warn!(connector_id = self.id, "transaction journal full, session refused");
                    return Err(BeginTxError::OutOfSlots);
                }
            }
        };

        tx.begin_timestamp = Some(now);
        tx.reservation_id = reservation_id;

        if pre_authorized {
            tx.authorized = true;
            sv.notify(self.id, TxNotification::Authorized);
        } else if sv.config.bool(config::LOCAL_PRE_AUTHORIZE) == Some(true)
            && sv
                .auth
                .local_authorization(id_tag)
                .map(|info| info.is_valid(now))
                .unwrap_or(false)
        {
            debug!(connector_id = self.id, id_tag, "locally pre-authorized");
            tx.authorized = true;
            sv.notify(self.id, TxNotification::Authorized);
        } else {
            self.authorize_in_flight = true;
            sv.outbox.push(Request::new(Operation::Authorize {
                connector_id: self.id,
                id_tag: id_tag.to_string(),
            }));
        }

        self.persist(sv, &tx);
        self.plug_seen_since_begin = false;
        self.transaction = Some(tx);
        Ok(())
    }

    /// Close the running session; the stop event itself fires on a later
    /// tick once the stop conditions hold.
    pub fn end_transaction(&mut self, sv: &mut Services, reason: Reason, stop_id_tag: Option<&str>) {
        let Some(tx) = self.transaction.as_mut() else { return };
        if !tx.active {
            return;
        }
        tx.end(reason);
        if let Some(tag) = stop_id_tag {
            tx.stop_id_tag = Some(tag.to_string());
        }
        let tx = tx.clone();
        self.persist(sv, &tx);
    }

    pub fn is_transaction_running(&self) -> bool {
        self.transaction
            .as_ref()
            .map(|tx| tx.is_running())
            .unwrap_or(false)
    }

    pub fn has_open_transaction(&self) -> bool {
        self.transaction
            .as_ref()
            .map(|tx| !tx.is_completed())
            .unwrap_or(false)
    }

    pub fn transaction_id(&self) -> Option<i32> {
        self.transaction.as_ref().map(|tx| tx.transaction_id)
    }

    pub fn ocpp_permits_charge(&self) -> bool {
        self.transaction
            .as_ref()
            .map(|tx| tx.ocpp_permits_charge())
            .unwrap_or(false)
    }

    pub fn current_status(&self) -> Option<ChargePointStatus> {
        self.current_status
    }

    // ── Authorization outcomes ─────────────────────────────

    /// `Authorize.conf` arrived for `id_tag`.
    pub fn on_authorize_result(
        &mut self,
        sv: &mut Services,
        id_tag: &str,
        accepted: bool,
    ) {
        self.authorize_in_flight = false;
        let Some(tx) = self.transaction.as_mut() else { return };
        if tx.id_tag != id_tag || tx.has_started() {
            return;
        }
        if accepted {
            tx.authorized = true;
            let tx = tx.clone();
            self.persist(sv, &tx);
            sv.notify(self.id, TxNotification::Authorized);
        } else {
            tx.id_tag_deauthorized = true;
            tx.end(Reason::DeAuthorized);
            let tx = tx.clone();
            self.persist(sv, &tx);
            sv.notify(self.id, TxNotification::AuthorizationRejected);
        }
    }

    /// `Authorize` timed out: fall back to the offline authorization
    /// policy.
    pub fn on_authorize_timeout(&mut self, sv: &mut Services, id_tag: &str) {
        self.authorize_in_flight = false;
        let now = sv.time.now();
        let local = sv.auth.local_authorization(id_tag);
        let verdict = match local {
            Some(info) if !info.is_valid(now) => false,
            Some(_) => sv.config.bool(config::LOCAL_AUTHORIZE_OFFLINE) == Some(true),
            None => sv.config.bool(config::ALLOW_OFFLINE_TX_FOR_UNKNOWN_ID) == Some(true),
        };

        let Some(tx) = self.transaction.as_mut() else { return };
        if tx.id_tag != id_tag || tx.has_started() {
            return;
        }
        if verdict {
            info!(connector_id = self.id, id_tag, "offline-authorized");
            tx.authorized = true;
            let tx = tx.clone();
            self.persist(sv, &tx);
            sv.notify(self.id, TxNotification::Authorized);
        } else {
            tx.end(Reason::Other);
            let tx = tx.clone();
            self.persist(sv, &tx);
            sv.notify(self.id, TxNotification::AuthorizationTimeout);
        }
    }

    /// `StartTransaction.conf` carried a non-Accepted `idTagInfo`.
    pub fn on_deauthorized(&mut self, sv: &mut Services) {
        let stop_on_invalid =
            sv.config.bool(config::STOP_TRANSACTION_ON_INVALID_ID) == Some(true);
        let Some(tx) = self.transaction.as_mut() else { return };
        if tx.is_completed() {
            return;
        }
        tx.id_tag_deauthorized = true;
        if stop_on_invalid {
            tx.end(Reason::DeAuthorized);
        }
        let tx = tx.clone();
        self.persist(sv, &tx);
        sv.notify(self.id, TxNotification::DeAuthorized);
    }

    // ── Unlock ─────────────────────────────────────────────

    /// Start an unlock: ends any running session, then polls the host
    /// actuator. Returns `None` if no actuator is wired up.
    pub fn unlock_begin(&mut self, sv: &mut Services) -> Option<UnlockStatus> {
        self.unlock_output.as_ref()?;
        self.end_transaction(sv, Reason::UnlockCommand, None);
        self.unlock_poll()
    }

    pub fn unlock_poll(&mut self) -> Option<UnlockStatus> {
        self.unlock_output.as_mut().map(|cb| cb())
    }

    // ── Tick ───────────────────────────────────────────────

    pub fn tick(&mut self, sv: &mut Services) {
        let inputs = self.poll_inputs();
        self.fault_code = inputs.error_code.clone();

        self.free_vend(sv, &inputs);
        if inputs.plug == Some(true) {
            self.plug_seen_since_begin = true;
        }
        self.prev_plug = inputs.plug.unwrap_or(false);

        self.drive_transaction(sv, &inputs);
        self.drive_status(sv, &inputs);

        // Metering: periodic and clock-aligned capture against the
        // running transaction.
        self.metering.tick(sv, self.transaction.as_ref());
    }

    fn poll_inputs(&mut self) -> InputSnapshot {
        let mut error_code = None;
        for input in self.error_code_inputs.iter_mut() {
            if let Some(code) = input() {
                error_code = Some(code);
                break;
            }
        }
        InputSnapshot {
            plug: self.plug_input.as_mut().map(|cb| cb()),
            ev_ready: self.ev_ready_input.as_mut().map(|cb| cb()).unwrap_or(true),
            evse_ready: self.evse_ready_input.as_mut().map(|cb| cb()).unwrap_or(true),
            occupied: self.occupied_input.as_mut().map(|cb| cb()).unwrap_or(false),
            error_code,
        }
    }

    fn free_vend(&mut self, sv: &mut Services, inputs: &InputSnapshot) {
        if sv.config.bool(config::FREE_VEND_ACTIVE) != Some(true) {
            return;
        }
        let plug = inputs.plug.unwrap_or(false);
        let rising_edge = plug && !self.prev_plug;
        if !rising_edge || self.has_open_transaction() {
            return;
        }
        let id_tag = sv
            .config
            .string(config::FREE_VEND_ID_TAG)
            .unwrap_or("A0000000")
            .to_string();
        info!(connector_id = self.id, id_tag = %id_tag, "free vend session");
        if let Err(e) = self.begin_transaction(sv, &id_tag, true) {
            warn!(connector_id = self.id, error = ?e, "free vend session refused");
        }
    }

    fn start_ready(&mut self) -> bool {
        if let Some(cb) = self.start_tx_ready_input.as_mut() {
            if !cb() {
                return false;
            }
        }
        self.tx_io
            .iter_mut()
            .all(|cb| cb(TxTrigger::Active) == TxEnableState::Active)
    }

    fn stop_ready(&mut self) -> bool {
        if let Some(cb) = self.stop_tx_ready_input.as_mut() {
            if !cb() {
                return false;
            }
        }
        self.tx_io
            .iter_mut()
            .all(|cb| cb(TxTrigger::Inactive) == TxEnableState::Inactive)
    }

    fn drive_transaction(&mut self, sv: &mut Services, inputs: &InputSnapshot) {
        if self.transaction.is_none() {
            return;
        }

        // Plug pulled during a started session.
        let stop_on_disconnect =
            sv.config.bool(config::STOP_TRANSACTION_ON_EV_SIDE_DISCONNECT) == Some(true);
        if let Some(tx) = self.transaction.as_mut() {
            if tx.active
                && tx.has_started()
                && stop_on_disconnect
                && self.plug_seen_since_begin
                && inputs.plug == Some(false)
            {
                tx.end(Reason::EvDisconnected);
                let snapshot = tx.clone();
                self.persist(sv, &snapshot);
            }
        }

        // Session opened but the vehicle never showed up.
        if let Some(tx) = self.transaction.as_ref() {
            if tx.active && !tx.has_started() && self.plug_input.is_some() && !self.plug_seen_since_begin
            {
                let timeout = sv.config.int(config::CONNECTION_TIME_OUT).unwrap_or(300);
                let expired = tx
                    .begin_timestamp
                    .map(|begin| {
                        clock::delta_seconds(begin, sv.time.now())
                            .map(|d| d >= timeout)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                if expired {
                    info!(connector_id = self.id, "connection timeout, aborting session");
                    if let Some(tx) = self.transaction.as_mut() {
                        tx.end(Reason::ConnectionTimeout);
                    }
                    sv.notify(self.id, TxNotification::ConnectionTimeout);
                }
            }
        }

        // Start event.
        let can_start = {
            let tx = self.transaction.as_ref().filter(|tx| {
                tx.active
                    && tx.authorized
                    && !tx.id_tag_deauthorized
                    && !tx.has_started()
            });
            tx.is_some()
                && inputs.plug != Some(false)
                && self.is_operative()
        };
        if can_start && self.start_ready() {
            self.start_event(sv);
        }

        // Stop event.
        let wants_stop = self
            .transaction
            .as_ref()
            .map(|tx| !tx.active && tx.is_running())
            .unwrap_or(false);
        if wants_stop && self.stop_ready() {
            self.stop_event(sv);
        }

        // Cleanup of aborted / fully reported sessions.
        let done = self
            .transaction
            .as_ref()
            .map(|tx| tx.is_completed())
            .unwrap_or(false);
        if done {
            if let Some(tx) = self.transaction.take() {
                if tx.is_aborted() && !tx.volatile {
                    sv.tx_store.discard_latest_if_aborted(self.id);
                }
            }
            if let Some(operative) = self.scheduled_availability.take() {
                self.apply_availability(sv, operative);
            }
        }
    }

    fn start_event(&mut self, sv: &mut Services) {
        let meter_start = self.metering.read_energy().unwrap_or(METER_UNDEFINED);
        let now = sv.time.now();
        let boot_nr = sv.boot_nr;

        let Some(tx) = self.transaction.as_mut() else { return };
        tx.start(meter_start, now, boot_nr);
        let silent = tx.silent;
        let tx_nr = tx.tx_nr;
        let snapshot = tx.clone();
        self.persist(sv, &snapshot);

        info!(connector_id = self.id, tx_nr, meter_start, "transaction started");
        self.metering.on_transaction_begin(sv, &snapshot);
        if !silent {
            sv.outbox.push(Request::new(Operation::StartTransaction {
                connector_id: self.id,
                tx_nr,
            }));
        }
        sv.notify(self.id, TxNotification::StartTx);
    }

    fn stop_event(&mut self, sv: &mut Services) {
        let meter_stop = self.metering.read_energy().unwrap_or(METER_UNDEFINED);
        let now = sv.time.now();
        let boot_nr = sv.boot_nr;

        let Some(tx) = self.transaction.as_mut() else { return };
        let reason = tx.stop_reason.unwrap_or(Reason::Local);
        tx.stop(reason, meter_stop, now, boot_nr);
        let silent = tx.silent;
        let tx_nr = tx.tx_nr;
        let snapshot = tx.clone();

        info!(connector_id = self.id, tx_nr, meter_stop, reason = %reason, "transaction stopped");
        self.metering.on_transaction_end(sv, &snapshot);
        self.persist(sv, &snapshot);
        if !silent {
            sv.outbox.push(Request::new(Operation::StopTransaction {
                connector_id: self.id,
                tx_nr,
            }));
        }
        sv.notify(self.id, TxNotification::StopTx);
    }

    fn persist(&self, sv: &mut Services, tx: &Transaction) {
        if !tx.volatile {
            sv.tx_store.commit(tx);
        }
    }

    // ── Status inference ───────────────────────────────────

    fn infer_status(&self, sv: &Services, inputs: &InputSnapshot) -> ChargePointStatus {
        let tx_running = self.is_transaction_running();
        let stop_on_disconnect =
            sv.config.bool(config::STOP_TRANSACTION_ON_EV_SIDE_DISCONNECT) == Some(true);

        if inputs.error_code.is_some() {
            return ChargePointStatus::Faulted;
        }
        if !self.is_operative() {
            return ChargePointStatus::Unavailable;
        }
        if tx_running {
            if inputs.plug == Some(false) && !stop_on_disconnect {
                return ChargePointStatus::SuspendedEv;
            }
            if !self.ocpp_permits_charge() || !inputs.evse_ready {
                return ChargePointStatus::SuspendedEvse;
            }
            if !inputs.ev_ready {
                return ChargePointStatus::SuspendedEv;
            }
            return ChargePointStatus::Charging;
        }
        let now = sv.time.now();
        if !self.has_open_transaction() && sv.reservations.active_for(self.id, now).is_some() {
            return ChargePointStatus::Reserved;
        }
        if !self.has_open_transaction() && inputs.plug != Some(true) && !inputs.occupied {
            return ChargePointStatus::Available;
        }
        match self.current_status {
            Some(
                ChargePointStatus::Charging
                | ChargePointStatus::SuspendedEv
                | ChargePointStatus::SuspendedEvse
                | ChargePointStatus::Finishing,
            ) => ChargePointStatus::Finishing,
            _ => ChargePointStatus::Preparing,
        }
    }

    fn drive_status(&mut self, sv: &mut Services, inputs: &InputSnapshot) {
        let inferred = self.infer_status(sv, inputs);
        let now_ms = sv.time.uptime_ms();
        if self.current_status != Some(inferred) {
            debug!(connector_id = self.id, status = %inferred, "status inferred");
            self.current_status = Some(inferred);
            self.status_since_ms = now_ms;
        }

        if !sv.boot_accepted {
            return;
        }
        if self.reported_status == self.current_status {
            return;
        }
        let min_duration_ms =
            sv.config.int(config::MINIMUM_STATUS_DURATION).unwrap_or(0).max(0) as u64 * 1000;
        let stable = now_ms.saturating_sub(self.status_since_ms) >= min_duration_ms;
        if self.reported_status.is_some() && !stable {
            return;
        }
        self.reported_status = self.current_status;
        sv.outbox.push(Request::new(Operation::StatusNotification {
            connector_id: self.id,
            status: inferred,
            error_code: self
                .fault_code
                .clone()
                .unwrap_or_else(|| "NoError".to_string()),
            timestamp: sv.time.now(),
        }));
    }

    /// Force a fresh `StatusNotification` (boot acceptance, TriggerMessage).
    pub fn trigger_status_notification(&mut self, sv: &mut Services) {
        let status = self.current_status.unwrap_or(ChargePointStatus::Available);
        self.reported_status = Some(status);
        sv.outbox.push(Request::new(Operation::StatusNotification {
            connector_id: self.id,
            status,
            error_code: self
                .fault_code
                .clone()
                .unwrap_or_else(|| "NoError".to_string()),
            timestamp: sv.time.now(),
        }));
    }
}
