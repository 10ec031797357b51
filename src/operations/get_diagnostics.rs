//! GetDiagnostics (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::diagnostics::DiagnosticsRequest;
use crate::domain::Model;
use crate::rpc::frame::CallError;
use crate::support::clock::parse_iso_8601;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    location: String,
    retries: Option<i32>,
    retry_interval: Option<i32>,
    start_time: Option<String>,
    stop_time: Option<String>,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let job = DiagnosticsRequest {
        location: request.location,
        start_time: request.start_time.as_deref().and_then(parse_iso_8601),
        stop_time: request.stop_time.as_deref().and_then(parse_iso_8601),
    };
    let file_name = model
        .diagnostics
        .schedule(job, request.retries, request.retry_interval);
    // An empty conf means "nothing to upload".
    Ok(match file_name {
        Some(file_name) => json!({ "fileName": file_name }),
        None => json!({}),
    })
}
