//! SendLocalList (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config;
use crate::domain::authorization::{LocalListUpdateOutcome, UpdateType};
use crate::domain::Model;
use crate::rpc::frame::CallError;

use super::types::AuthorizationData;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    list_version: i32,
    #[serde(default)]
    local_authorization_list: Vec<AuthorizationData>,
    update_type: UpdateType,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;

    if model.config.bool(config::LOCAL_AUTH_LIST_ENABLED) != Some(true) {
        return Ok(json!({ "status": "NotSupported" }));
    }
    let outcome = model.auth.update_local_list(
        request.list_version,
        request.update_type,
        request.local_authorization_list,
    );
    let status = match outcome {
        LocalListUpdateOutcome::Accepted => "Accepted",
        LocalListUpdateOutcome::Failed => "Failed",
        LocalListUpdateOutcome::VersionMismatch => "VersionMismatch",
    };
    Ok(json!({ "status": status }))
}
