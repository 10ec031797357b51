//! UnlockConnector (CS → CP).
//!
//! The host actuator may answer `Pending`; the reply is then deferred and
//! the engine keeps polling (see the inbound FIFO's ready bit) until the
//! actuator resolves or the poll window expires.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::connector::UnlockStatus;
use crate::domain::Model;
use crate::rpc::frame::CallError;

use super::{DeferredReply, HandleOutcome};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    connector_id: u32,
}

fn reply(status: &str) -> Value {
    json!({ "status": status })
}

pub fn handle(model: &mut Model, payload: Value) -> Result<HandleOutcome, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;

    if model.connector(request.connector_id).is_none() {
        return Ok(HandleOutcome::Reply(reply("UnlockFailed")));
    }
    let outcome = model
        .with_connector(request.connector_id, |c, sv| c.unlock_begin(sv))
        .flatten();
    Ok(match outcome {
        None => HandleOutcome::Reply(reply("NotSupported")),
        Some(UnlockStatus::Unlocked) => HandleOutcome::Reply(reply("Unlocked")),
        Some(UnlockStatus::UnlockFailed) => HandleOutcome::Reply(reply("UnlockFailed")),
        Some(UnlockStatus::Pending) => HandleOutcome::Deferred(DeferredReply::UnlockConnector {
            connector_id: request.connector_id,
        }),
    })
}

/// Poll a deferred unlock; `None` keeps waiting.
pub fn poll(model: &mut Model, connector_id: u32) -> Option<Value> {
    let status = model.connector_mut(connector_id)?.unlock_poll()?;
    match status {
        UnlockStatus::Pending => None,
        UnlockStatus::Unlocked => Some(reply("Unlocked")),
        UnlockStatus::UnlockFailed => Some(reply("UnlockFailed")),
    }
}
