//! CancelReservation (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::Model;
use crate::rpc::frame::CallError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    reservation_id: i32,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let status = if model.reservations.cancel(request.reservation_id) {
        "Accepted"
    } else {
        "Rejected"
    };
    Ok(json!({ "status": status }))
}
