//! The aggregate device model: every subsystem, one owner.
//!
//! `Model` owns the configuration registry, the persistence stores, the
//! per-connector state machines and the lifecycle services. The RPC engine
//! stays outside; it receives the model by reference when transmitting or
//! dispatching (see `rpc::engine`).

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{self, declare_standard_keys, ConfigRegistry};
use crate::operations::operation::{Operation, Outbox, Request};
use crate::operations::types::ChargePointStatus;
use crate::storage::SharedFilesystem;
use crate::support::clock::{Clock, TimeService};

use super::authorization::AuthorizationService;
use super::boot::{BootCredentials, BootService, HeartbeatService};
use super::connector::Connector;
use super::diagnostics::DiagnosticsService;
use super::firmware::FirmwareService;
use super::reservation::ReservationService;
use super::smart_charging::{SessionContext, SmartChargingService};
use super::transaction::SyncState;
use super::transaction_store::TransactionStore;
use super::{Services, TxNotificationCallback};

/// Pending reset accepted from the Central System.
#[derive(Debug, Clone, Copy)]
struct PendingReset {
    hard: bool,
    requested_at_ms: u64,
}

/// Grace period for draining the outbound queue before a reset executes.
const RESET_FLUSH_TIMEOUT_MS: u64 = 10_000;

/// Construction parameters of the device model.
pub struct ModelOptions {
    pub fs: Option<SharedFilesystem>,
    pub clock: Box<dyn Clock>,
    pub connector_count: usize,
    pub credentials: BootCredentials,
    /// Nominal grid voltage, used for amp/watt conversions in composite
    /// schedules.
    pub voltage: f64,
    pub max_tx_cnt: u32,
}

pub struct Model {
    pub config: ConfigRegistry,
    pub time: TimeService,
    pub tx_store: TransactionStore,
    pub reservations: ReservationService,
    pub auth: AuthorizationService,
    pub smart_charging: SmartChargingService,
    pub boot: BootService,
    pub heartbeat: HeartbeatService,
    pub firmware: FirmwareService,
    pub diagnostics: DiagnosticsService,
    pub connectors: Vec<Connector>,
    pub outbox: Outbox,
    pub tx_notify: Option<TxNotificationCallback>,

    // Reset coordination.
    pub reset_notify_hook: Option<Box<dyn FnMut(bool) -> bool>>,
    pub reset_execute_hook: Option<Box<dyn FnMut(bool)>>,
    pending_reset: Option<PendingReset>,

    /// Vendor hook for CS-initiated `DataTransfer`; `(status, data)`.
    pub data_transfer_hook:
        Option<Box<dyn FnMut(&str, Option<&str>, Option<&str>) -> (String, Option<String>)>>,

    // Charge point aggregate (connector 0) status reporting.
    cp_availability: bool,
    cp_reported_status: Option<ChargePointStatus>,

    /// Transport connectivity, maintained by the RPC engine.
    pub connected: bool,
    prev_running: Vec<bool>,
}

impl Model {
    pub fn new(opts: ModelOptions) -> Self {
        let mut cfg = ConfigRegistry::new(opts.fs.clone());
        declare_standard_keys(&mut cfg, opts.connector_count);
        cfg.declare(
            "ConnectorAvailability0",
            config::ConfigValue::Bool(true),
            true,
            false,
            true,
        );
        cfg.load();

        let connectors: Vec<Connector> = (1..=opts.connector_count as u32)
            .map(|id| Connector::new(id, &mut cfg))
            .collect();
        let cp_availability = cfg.bool("ConnectorAvailability0").unwrap_or(true);

        let mut time = TimeService::new(opts.clock);
        let tx_store = match opts.fs.clone() {
            Some(fs) => TransactionStore::open(fs, opts.connector_count, opts.max_tx_cnt),
            None => {
                // Volatile operation: an in-memory store keeps the same
                // code paths alive.
                let fs: SharedFilesystem =
                    std::sync::Arc::new(crate::storage::MemoryFilesystem::new());
                TransactionStore::open(fs, opts.connector_count, opts.max_tx_cnt)
            }
        };
        let reservations = ReservationService::new(opts.fs.clone(), opts.connector_count);
        let max_list = cfg.int(config::LOCAL_AUTH_LIST_MAX_LENGTH).unwrap_or(64).max(0) as usize;
        let auth = AuthorizationService::new(opts.fs.clone(), max_list);
        let mut smart_charging =
            SmartChargingService::new(opts.fs.clone(), opts.connector_count, opts.voltage);
        smart_charging.load_all(time.now());
        let boot = BootService::new(opts.fs.as_ref(), opts.credentials);

        let prev_running = vec![false; opts.connector_count];
        let mut model = Self {
            config: cfg,
            time,
            tx_store,
            reservations,
            auth,
            smart_charging,
            boot,
            heartbeat: HeartbeatService::new(),
            firmware: FirmwareService::new(),
            diagnostics: DiagnosticsService::new(),
            connectors,
            outbox: Outbox::default(),
            tx_notify: None,
            reset_notify_hook: None,
            reset_execute_hook: None,
            pending_reset: None,
            data_transfer_hook: None,
            cp_availability,
            cp_reported_status: None,
            connected: false,
            prev_running,
        };
        model.recover_transactions();
        model
    }

    // ── Accessors ──────────────────────────────────────────

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    pub fn connector(&self, connector_id: u32) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id() == connector_id)
    }

    pub fn connector_mut(&mut self, connector_id: u32) -> Option<&mut Connector> {
        self.connectors.iter_mut().find(|c| c.id() == connector_id)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Run `f` with one connector and the shared services borrowed side
    /// by side.
    pub fn with_connector<R>(
        &mut self,
        connector_id: u32,
        f: impl FnOnce(&mut Connector, &mut Services) -> R,
    ) -> Option<R> {
        let idx = self
            .connectors
            .iter()
            .position(|c| c.id() == connector_id)?;
        let boot_nr = self.boot.boot_nr();
        let boot_accepted = self.boot.is_accepted();
        let online = self.connected && boot_accepted;
        let connector = &mut self.connectors[idx];
        let mut sv = Services {
            config: &mut self.config,
            time: &mut self.time,
            tx_store: &mut self.tx_store,
            reservations: &mut self.reservations,
            auth: &mut self.auth,
            outbox: &mut self.outbox,
            tx_notify: &mut self.tx_notify,
            boot_nr,
            online,
            boot_accepted,
        };
        Some(f(connector, &mut sv))
    }

    /// Run `f` with the shared services alone.
    pub fn with_services<R>(&mut self, f: impl FnOnce(&mut Services) -> R) -> R {
        let boot_nr = self.boot.boot_nr();
        let boot_accepted = self.boot.is_accepted();
        let online = self.connected && boot_accepted;
        let mut sv = Services {
            config: &mut self.config,
            time: &mut self.time,
            tx_store: &mut self.tx_store,
            reservations: &mut self.reservations,
            auth: &mut self.auth,
            outbox: &mut self.outbox,
            tx_notify: &mut self.tx_notify,
            boot_nr,
            online,
            boot_accepted,
        };
        f(&mut sv)
    }

    // ── Boot-time recovery ─────────────────────────────────

    /// Replay transactions found on disk: close stranded sessions with
    /// `PowerLoss` and re-queue unconfirmed start/stop reports, oldest
    /// first.
    fn recover_transactions(&mut self) {
        let now = self.time.now();
        let boot_nr = self.boot.boot_nr();
        for idx in 0..self.connectors.len() {
            let connector_id = self.connectors[idx].id();
            for tx_nr in self.tx_store.tx_numbers(connector_id) {
                let Some(mut tx) = self.tx_store.load(connector_id, tx_nr) else {
                    continue;
                };
                if tx.is_completed() {
                    continue;
                }
                if tx.active && !tx.has_started() {
                    // The session never started before power was lost.
                    tx.active = false;
                    self.tx_store.commit(&tx);
                    continue;
                }
                if tx.is_running() {
                    info!(connector_id, tx_nr, "closing stranded transaction after reboot");
                    tx.end(crate::operations::types::Reason::PowerLoss);
                    tx.stop(
                        crate::operations::types::Reason::PowerLoss,
                        super::transaction::METER_UNDEFINED,
                        now,
                        boot_nr,
                    );
                    self.tx_store.commit(&tx);
                }
                if !tx.silent {
                    if tx.started_sync == SyncState::Requested {
                        self.outbox.push(Request::new(Operation::StartTransaction {
                            connector_id,
                            tx_nr,
                        }));
                    }
                    if tx.stopped_sync == SyncState::Requested {
                        self.outbox.push(Request::new(Operation::StopTransaction {
                            connector_id,
                            tx_nr,
                        }));
                    }
                }
            }
        }
    }

    // ── Reset coordination ─────────────────────────────────

    /// `Reset.req` accepted: close every session and schedule execution.
    pub fn schedule_reset(&mut self, hard: bool) {
        let reason = if hard {
            crate::operations::types::Reason::HardReset
        } else {
            crate::operations::types::Reason::SoftReset
        };
        for idx in 0..self.connectors.len() {
            let connector_id = self.connectors[idx].id();
            self.with_connector(connector_id, |c, sv| {
                c.end_transaction(sv, reason, None);
            });
        }
        self.pending_reset = Some(PendingReset {
            hard,
            requested_at_ms: self.time.uptime_ms(),
        });
        info!(hard, "reset scheduled");
    }

    /// Execute the pending reset once the outbound queue drained (or the
    /// flush grace expired). Returns `true` when the executor ran.
    pub fn run_pending_reset(&mut self, outbound_idle: bool) -> bool {
        let Some(pending) = self.pending_reset else {
            return false;
        };
        let sessions_closed = self.connectors.iter().all(|c| !c.has_open_transaction());
        let expired = self.time.uptime_ms().saturating_sub(pending.requested_at_ms)
            >= RESET_FLUSH_TIMEOUT_MS;
        if !(expired || (outbound_idle && sessions_closed)) {
            return false;
        }
        self.pending_reset = None;
        match self.reset_execute_hook.as_mut() {
            Some(hook) => {
                info!(hard = pending.hard, "executing reset");
                hook(pending.hard);
                true
            }
            None => {
                warn!("reset accepted but no reset executor registered");
                false
            }
        }
    }

    // ── Tick ───────────────────────────────────────────────

    /// Advance every subsystem by one cooperative step.
    pub fn tick(&mut self) {
        let boot_nr = self.boot.boot_nr();
        let boot_accepted = self.boot.is_accepted();
        let online = self.connected && boot_accepted;

        self.reservations.tick(self.time.now());

        // Firmware installation forces the connectors inoperative.
        let installing = self.firmware.installation_in_progress();
        let all_idle = self.connectors.iter().all(|c| !c.has_open_transaction());
        for connector in self.connectors.iter_mut() {
            connector.volatile_availability = !installing;
        }

        // Lifecycle services and connectors share the services borrow.
        {
            let mut sv = Services {
                config: &mut self.config,
                time: &mut self.time,
                tx_store: &mut self.tx_store,
                reservations: &mut self.reservations,
                auth: &mut self.auth,
                outbox: &mut self.outbox,
                tx_notify: &mut self.tx_notify,
                boot_nr,
                online,
                boot_accepted,
            };
            self.boot.tick(&mut sv);
            self.heartbeat.tick(&mut sv, boot_accepted);
            for connector in self.connectors.iter_mut() {
                connector.tick(&mut sv);
            }
            self.firmware.tick(&mut sv, all_idle);
            self.diagnostics.tick(&mut sv);
        }

        // Smart charging follows the session state.
        let sessions: Vec<SessionContext> = self
            .connectors
            .iter()
            .map(|c| {
                let tx = c.transaction.as_ref().filter(|tx| tx.is_running());
                SessionContext {
                    start: tx.and_then(|tx| tx.start_timestamp),
                    transaction_id: tx
                        .map(|tx| tx.transaction_id)
                        .filter(|id| *id > 0),
                }
            })
            .collect();
        for (i, connector) in self.connectors.iter().enumerate() {
            let running = connector.is_transaction_running();
            if self.prev_running[i] && !running {
                self.smart_charging.clear_tx_profiles(connector.id());
            }
            self.prev_running[i] = running;
        }
        self.smart_charging.tick(self.time.now(), &sessions);

        self.tick_cp_status(boot_accepted);
        self.config.checkpoint();
    }

    /// Connector 0 (the charge point aggregate) reports Available or
    /// Unavailable; Unavailable additionally requires that no session is
    /// running anywhere.
    fn tick_cp_status(&mut self, boot_accepted: bool) {
        let any_running = self.connectors.iter().any(|c| c.is_transaction_running());
        let status = if !self.cp_availability && !any_running {
            ChargePointStatus::Unavailable
        } else {
            ChargePointStatus::Available
        };
        if !boot_accepted || self.cp_reported_status == Some(status) {
            return;
        }
        self.cp_reported_status = Some(status);
        let timestamp = self.time.now();
        self.outbox.push(Request::new(Operation::StatusNotification {
            connector_id: 0,
            status,
            error_code: "NoError".to_string(),
            timestamp,
        }));
    }

    /// `ChangeAvailability` on connector 0.
    pub fn set_cp_availability(&mut self, operative: bool) {
        self.cp_availability = operative;
        self.config
            .set("ConnectorAvailability0", config::ConfigValue::Bool(operative));
        self.config.checkpoint();
    }

    pub fn cp_availability(&self) -> bool {
        self.cp_availability
    }

    /// Boot acceptance transition: re-announce every status.
    pub fn on_boot_accepted(&mut self) {
        self.cp_reported_status = None;
        for idx in 0..self.connectors.len() {
            let connector_id = self.connectors[idx].id();
            self.with_connector(connector_id, |c, sv| {
                c.trigger_status_notification(sv);
            });
        }
    }
}
