//! Reset (CS → CP).
//!
//! The confirmation goes out first; the executor runs only after the
//! outbound queue has drained (or the flush grace expired), so the
//! `StopTransaction`s triggered by the reset still reach the Central
//! System.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::domain::Model;
use crate::rpc::frame::CallError;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
enum ResetType {
    Hard,
    Soft,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    #[serde(rename = "type")]
    kind: ResetType,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let hard = request.kind == ResetType::Hard;

    if let Some(hook) = model.reset_notify_hook.as_mut() {
        if !hook(hard) {
            info!(hard, "reset vetoed by host");
            return Ok(json!({ "status": "Rejected" }));
        }
    }
    model.schedule_reset(hard);
    Ok(json!({ "status": "Accepted" }))
}
