//! The embeddable charge point: facade over the model, the RPC engine
//! and the transport.
//!
//! The host constructs a [`ChargePoint`], wires its EVSE inputs and
//! outputs, then calls [`ChargePoint::step`] from its main loop. Every
//! callback fires on that loop; nothing inside blocks.

use tracing::info;

use crate::domain::boot::BootCredentials;
use crate::domain::connector::{
    BoolInput, ErrorCodeInput, TxIoCallback, UnlockCallback,
};
use crate::domain::diagnostics::DiagnosticsHooks;
use crate::domain::firmware::{DownloadHook, InstallHook};
use crate::domain::metering::{EnergyInput, MeterValueSampler, PowerInput};
use crate::domain::model::{Model, ModelOptions};
use crate::domain::smart_charging::LimitOutput;
use crate::domain::transaction_store::DEFAULT_MAX_TX_CNT;
use crate::domain::TxNotificationCallback;
use crate::operations::types::{Location, Phase, Reason};
use crate::operations::{CallListener, Operation, Request};
use crate::rpc::RpcEngine;
use crate::storage::SharedFilesystem;
use crate::support::clock::{Clock, SystemClock};
use crate::transport::Transport;

/// Construction parameters for [`ChargePoint`].
pub struct ChargePointOptions {
    pub transport: Box<dyn Transport>,
    pub fs: Option<SharedFilesystem>,
    pub clock: Box<dyn Clock>,
    pub credentials: BootCredentials,
    pub connector_count: usize,
    /// Nominal grid voltage for amp/watt conversions.
    pub voltage: f64,
    /// Transaction journal depth per connector.
    pub max_tx_cnt: u32,
}

impl ChargePointOptions {
    pub fn new(transport: Box<dyn Transport>, credentials: BootCredentials) -> Self {
        Self {
            transport,
            fs: None,
            clock: Box::new(SystemClock::new()),
            credentials,
            connector_count: 1,
            voltage: 230.0,
            max_tx_cnt: DEFAULT_MAX_TX_CNT,
        }
    }

    pub fn with_filesystem(mut self, fs: SharedFilesystem) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_connectors(mut self, count: usize) -> Self {
        self.connector_count = count.max(1);
        self
    }

    pub fn with_voltage(mut self, voltage: f64) -> Self {
        self.voltage = voltage;
        self
    }

    pub fn with_max_tx_cnt(mut self, max_tx_cnt: u32) -> Self {
        self.max_tx_cnt = max_tx_cnt.max(1);
        self
    }
}

pub struct ChargePoint {
    model: Model,
    engine: RpcEngine,
    transport: Box<dyn Transport>,
}

impl ChargePoint {
    pub fn new(opts: ChargePointOptions) -> Self {
        let model = Model::new(ModelOptions {
            fs: opts.fs,
            clock: opts.clock,
            connector_count: opts.connector_count,
            credentials: opts.credentials,
            voltage: opts.voltage,
            max_tx_cnt: opts.max_tx_cnt,
        });
        info!(connectors = model.connector_count(), "charge point initialised");
        Self {
            model,
            engine: RpcEngine::new(),
            transport: opts.transport,
        }
    }

    /// One cooperative step: ingest frames, advance every subsystem,
    /// flush what they produced.
    pub fn step(&mut self) {
        self.engine.step(&mut self.model, self.transport.as_mut());
        self.model.tick();
        // Second engine pass so requests produced by this tick leave
        // within the same step.
        self.engine.step(&mut self.model, self.transport.as_mut());

        let idle = self.engine.is_idle();
        self.model.run_pending_reset(idle);
    }

    // ── Session control ────────────────────────────────────

    /// Open a session; the `Authorize` round trip and the
    /// `StartTransaction` follow through the state machine.
    pub fn begin_transaction(&mut self, connector_id: u32, id_tag: &str) -> bool {
        let id_tag = id_tag.to_string();
        self.model
            .with_connector(connector_id, |c, sv| {
                c.begin_transaction(sv, &id_tag, false).is_ok()
            })
            .unwrap_or(false)
    }

    /// Close the running session with `reason`.
    pub fn end_transaction(
        &mut self,
        connector_id: u32,
        reason: Reason,
        stop_id_tag: Option<&str>,
    ) {
        self.model.with_connector(connector_id, |c, sv| {
            c.end_transaction(sv, reason, stop_id_tag);
        });
    }

    pub fn is_transaction_running(&self, connector_id: u32) -> bool {
        self.model
            .connector(connector_id)
            .map(|c| c.is_transaction_running())
            .unwrap_or(false)
    }

    pub fn ocpp_permits_charge(&self, connector_id: u32) -> bool {
        self.model
            .connector(connector_id)
            .map(|c| c.ocpp_permits_charge())
            .unwrap_or(false)
    }

    /// CS-assigned transaction id of the open session, if assigned yet.
    pub fn transaction_id(&self, connector_id: u32) -> Option<i32> {
        self.model
            .connector(connector_id)
            .and_then(|c| c.transaction_id())
            .filter(|id| *id > 0)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_operative(&self, connector_id: u32) -> bool {
        self.model
            .connector(connector_id)
            .map(|c| c.is_operative())
            .unwrap_or(false)
    }

    // ── Input wiring ───────────────────────────────────────

    pub fn set_connector_plugged_input(&mut self, connector_id: u32, cb: BoolInput) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.set_plug_input(cb);
        }
    }

    pub fn set_ev_ready_input(&mut self, connector_id: u32, cb: BoolInput) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.set_ev_ready_input(cb);
        }
    }

    pub fn set_evse_ready_input(&mut self, connector_id: u32, cb: BoolInput) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.set_evse_ready_input(cb);
        }
    }

    pub fn set_occupied_input(&mut self, connector_id: u32, cb: BoolInput) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.set_occupied_input(cb);
        }
    }

    pub fn add_error_code_input(&mut self, connector_id: u32, cb: ErrorCodeInput) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.add_error_code_input(cb);
        }
    }

    pub fn set_energy_meter_input(&mut self, connector_id: u32, cb: EnergyInput) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.metering.set_energy_input(cb);
        }
    }

    pub fn set_power_meter_input(&mut self, connector_id: u32, cb: PowerInput) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.metering.set_power_input(cb);
        }
    }

    pub fn add_meter_value_input(
        &mut self,
        connector_id: u32,
        sampler: MeterValueSampler,
        measurand: &str,
        unit: Option<String>,
        phase: Option<Phase>,
        location: Option<Location>,
    ) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.metering.add_input(sampler, measurand, unit, phase, location);
        }
    }

    // ── Output wiring ──────────────────────────────────────

    /// Limit output; connector 0 receives the charge point aggregate.
    pub fn set_smart_charging_output(&mut self, connector_id: u32, cb: LimitOutput) {
        self.model.smart_charging.set_limit_output(connector_id, cb);
    }

    pub fn set_connector_lock_in_out(&mut self, connector_id: u32, cb: TxIoCallback) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.add_tx_io(cb);
        }
    }

    pub fn set_tx_based_meter_in_out(&mut self, connector_id: u32, cb: TxIoCallback) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.add_tx_io(cb);
        }
    }

    pub fn set_on_unlock_connector(&mut self, connector_id: u32, cb: UnlockCallback) {
        if let Some(c) = self.model.connector_mut(connector_id) {
            c.set_unlock_output(cb);
        }
    }

    pub fn set_tx_notification_output(&mut self, cb: TxNotificationCallback) {
        self.model.tx_notify = Some(cb);
    }

    pub fn set_on_reset_notify(&mut self, cb: Box<dyn FnMut(bool) -> bool>) {
        self.model.reset_notify_hook = Some(cb);
    }

    pub fn set_on_reset_execute(&mut self, cb: Box<dyn FnMut(bool)>) {
        self.model.reset_execute_hook = Some(cb);
    }

    pub fn set_firmware_download_hook(&mut self, cb: DownloadHook) {
        self.model.firmware.set_download_hook(cb);
    }

    pub fn set_firmware_install_hook(&mut self, cb: InstallHook) {
        self.model.firmware.set_install_hook(cb);
    }

    pub fn set_diagnostics_hooks(&mut self, hooks: DiagnosticsHooks) {
        self.model.diagnostics.set_hooks(hooks);
    }

    pub fn set_data_transfer_hook(
        &mut self,
        cb: Box<dyn FnMut(&str, Option<&str>, Option<&str>) -> (String, Option<String>)>,
    ) {
        self.model.data_transfer_hook = Some(cb);
    }

    // ── Ad-hoc operations ──────────────────────────────────

    /// Stand-alone `Authorize` with host callbacks.
    pub fn authorize(&mut self, id_tag: &str, listener: CallListener) {
        self.model.outbox.push(
            Request::new(Operation::Authorize {
                connector_id: 0,
                id_tag: id_tag.to_string(),
            })
            .with_listener(listener),
        );
    }

    /// CP-initiated `DataTransfer`.
    pub fn data_transfer(
        &mut self,
        vendor_id: &str,
        message_id: Option<&str>,
        data: Option<&str>,
        listener: CallListener,
    ) {
        self.model.outbox.push(
            Request::new(Operation::DataTransfer {
                vendor_id: vendor_id.to_string(),
                message_id: message_id.map(|s| s.to_string()),
                data: data.map(|s| s.to_string()),
            })
            .with_listener(listener),
        );
    }

    // ── Introspection ──────────────────────────────────────

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn pending_calls(&self) -> usize {
        self.engine.outbound_len()
    }
}
