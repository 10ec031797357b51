//! UpdateFirmware (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::Model;
use crate::rpc::frame::CallError;
use crate::support::clock::parse_iso_8601;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    location: String,
    retrieve_date: Option<String>,
    retries: Option<i32>,
    retry_interval: Option<i32>,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let retrieve_date = match request.retrieve_date.as_deref() {
        Some(raw) => Some(
            parse_iso_8601(raw)
                .ok_or_else(|| CallError::property_violation("invalid retrieveDate"))?,
        ),
        None => None,
    };
    model.firmware.schedule(
        request.location,
        retrieve_date,
        request.retries,
        request.retry_interval,
    );
    // The conf carries no fields; progress arrives via
    // FirmwareStatusNotification.
    Ok(json!({}))
}
