//! The OCPP 1.6 message dictionary.
//!
//! One module per operation, in both directions. Charge-point-initiated
//! calls are described by [`operation::Operation`] and dispatched through
//! [`build_request`] / [`apply_response`]; Central-System-initiated calls
//! enter through [`handle_call`], keyed by action name.

use serde_json::Value;
use tracing::warn;

use crate::domain::Model;
use crate::rpc::frame::CallError;

pub mod operation;
pub mod types;

mod authorize;
mod boot_notification;
mod cancel_reservation;
mod change_availability;
mod change_configuration;
mod clear_cache;
mod clear_charging_profile;
mod data_transfer;
mod get_composite_schedule;
mod get_configuration;
mod get_diagnostics;
mod get_local_list_version;
mod heartbeat;
mod meter_values;
mod remote_start_transaction;
mod remote_stop_transaction;
mod reserve_now;
mod reset;
mod send_local_list;
mod set_charging_profile;
mod start_transaction;
mod status_notification;
mod stop_transaction;
mod trigger_message;
mod unlock_connector;
mod update_firmware;

pub use operation::{CallListener, Operation, Outbox, Request, TimeoutPolicy};

// ── Outbound dispatch ──────────────────────────────────────────

/// Result of building an outbound payload at transmission time.
#[derive(Debug)]
pub enum BuildOutcome {
    Payload(Value),
    /// The call no longer applies (e.g. its transaction aborted); drop it
    /// without an error.
    Skip,
}

/// Build the request payload of `op` against the current model state.
pub fn build_request(model: &mut Model, op: &Operation) -> BuildOutcome {
    use Operation::*;
    let payload = match op {
        BootNotification => Some(boot_notification::build_request(model)),
        Heartbeat => Some(heartbeat::build_request()),
        Authorize { id_tag, .. } => Some(authorize::build_request(id_tag)),
        StartTransaction {
            connector_id,
            tx_nr,
        } => start_transaction::build_request(model, *connector_id, *tx_nr),
        StopTransaction {
            connector_id,
            tx_nr,
        } => stop_transaction::build_request(model, *connector_id, *tx_nr),
        MeterValues {
            connector_id,
            tx_nr,
            meter_values,
        } => meter_values::build_request(model, *connector_id, *tx_nr, meter_values),
        StatusNotification {
            connector_id,
            status,
            error_code,
            timestamp,
        } => Some(status_notification::build_request(
            *connector_id,
            *status,
            error_code,
            *timestamp,
        )),
        DiagnosticsStatusNotification { status } => {
            serde_json::to_value(status).ok().map(|s| {
                let mut payload = serde_json::Map::new();
                payload.insert("status".to_string(), s);
                Value::Object(payload)
            })
        }
        FirmwareStatusNotification { status } => serde_json::to_value(status).ok().map(|s| {
            let mut payload = serde_json::Map::new();
            payload.insert("status".to_string(), s);
            Value::Object(payload)
        }),
        DataTransfer {
            vendor_id,
            message_id,
            data,
        } => Some(data_transfer::build_request(
            vendor_id,
            message_id.as_deref(),
            data.as_deref(),
        )),
    };
    match payload {
        Some(payload) => BuildOutcome::Payload(payload),
        None => BuildOutcome::Skip,
    }
}

/// Apply a `CallResult` to the model.
pub fn apply_response(model: &mut Model, op: &Operation, payload: &Value) {
    use Operation::*;
    match op {
        BootNotification => boot_notification::on_conf(model, payload),
        Heartbeat => heartbeat::on_conf(model, payload),
        Authorize {
            connector_id,
            id_tag,
        } => authorize::on_conf(model, *connector_id, id_tag, payload),
        StartTransaction {
            connector_id,
            tx_nr,
        } => start_transaction::on_conf(model, *connector_id, *tx_nr, payload),
        StopTransaction {
            connector_id,
            tx_nr,
        } => stop_transaction::on_conf(model, *connector_id, *tx_nr, payload),
        MeterValues { .. }
        | StatusNotification { .. }
        | DiagnosticsStatusNotification { .. }
        | FirmwareStatusNotification { .. }
        | DataTransfer { .. } => {}
    }
}

/// Apply a `CallError` received from the Central System.
pub fn apply_call_error(model: &mut Model, op: &Operation, code: &str, description: &str) {
    warn!(action = op.action(), code, description, "call failed");
    apply_failure(model, op);
}

/// Apply a timeout fired by the engine.
pub fn apply_timeout(model: &mut Model, op: &Operation) {
    warn!(action = op.action(), "call timed out");
    apply_failure(model, op);
}

fn apply_failure(model: &mut Model, op: &Operation) {
    use Operation::*;
    match op {
        BootNotification => boot_notification::on_failure(model),
        Authorize {
            connector_id,
            id_tag,
        } => authorize::on_failure(model, *connector_id, id_tag),
        StartTransaction {
            connector_id,
            tx_nr,
        } => start_transaction::on_failure(model, *connector_id, *tx_nr),
        StopTransaction {
            connector_id,
            tx_nr,
        } => stop_transaction::on_failure(model, *connector_id, *tx_nr),
        _ => {}
    }
}

// ── Inbound dispatch ───────────────────────────────────────────

/// A reply that is not ready yet; the engine polls it each step while
/// holding its slot in the inbound FIFO.
#[derive(Debug, Clone)]
pub enum DeferredReply {
    UnlockConnector { connector_id: u32 },
}

/// Outcome of handling an inbound call.
#[derive(Debug)]
pub enum HandleOutcome {
    Reply(Value),
    Deferred(DeferredReply),
}

/// Dispatch an inbound call by action name.
pub fn handle_call(
    model: &mut Model,
    action: &str,
    payload: Value,
) -> Result<HandleOutcome, CallError> {
    let reply = |r: Result<Value, CallError>| r.map(HandleOutcome::Reply);
    match action {
        "ChangeAvailability" => reply(change_availability::handle(model, payload)),
        "ChangeConfiguration" => reply(change_configuration::handle(model, payload)),
        "ClearCache" => reply(clear_cache::handle(model, payload)),
        "ClearChargingProfile" => reply(clear_charging_profile::handle(model, payload)),
        "DataTransfer" => reply(data_transfer::handle(model, payload)),
        "GetCompositeSchedule" => reply(get_composite_schedule::handle(model, payload)),
        "GetConfiguration" => reply(get_configuration::handle(model, payload)),
        "GetDiagnostics" => reply(get_diagnostics::handle(model, payload)),
        "GetLocalListVersion" => reply(get_local_list_version::handle(model, payload)),
        "RemoteStartTransaction" => reply(remote_start_transaction::handle(model, payload)),
        "RemoteStopTransaction" => reply(remote_stop_transaction::handle(model, payload)),
        "ReserveNow" => reply(reserve_now::handle(model, payload)),
        "Reset" => reply(reset::handle(model, payload)),
        "SendLocalList" => reply(send_local_list::handle(model, payload)),
        "SetChargingProfile" => reply(set_charging_profile::handle(model, payload)),
        "TriggerMessage" => reply(trigger_message::handle(model, payload)),
        "UnlockConnector" => unlock_connector::handle(model, payload),
        "UpdateFirmware" => reply(update_firmware::handle(model, payload)),
        "CancelReservation" => reply(cancel_reservation::handle(model, payload)),
        other => Err(CallError::not_implemented(other)),
    }
}

/// Poll a deferred reply; `None` keeps waiting.
pub fn poll_deferred(model: &mut Model, deferred: &DeferredReply) -> Option<Value> {
    match deferred {
        DeferredReply::UnlockConnector { connector_id } => {
            unlock_connector::poll(model, *connector_id)
        }
    }
}
