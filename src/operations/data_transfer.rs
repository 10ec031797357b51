//! DataTransfer, both directions.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::Model;
use crate::rpc::frame::CallError;

/// CP → CS request.
pub fn build_request(vendor_id: &str, message_id: Option<&str>, data: Option<&str>) -> Value {
    let mut payload = json!({ "vendorId": vendor_id });
    if let Some(message_id) = message_id {
        payload["messageId"] = json!(message_id);
    }
    if let Some(data) = data {
        payload["data"] = json!(data);
    }
    payload
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    vendor_id: String,
    message_id: Option<String>,
    data: Option<String>,
}

/// CS → CP request: handed to the host hook, `UnknownVendorId` without
/// one.
pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let Some(hook) = model.data_transfer_hook.as_mut() else {
        return Ok(json!({ "status": "UnknownVendorId" }));
    };
    let (status, data) = hook(
        &request.vendor_id,
        request.message_id.as_deref(),
        request.data.as_deref(),
    );
    let mut response = json!({ "status": status });
    if let Some(data) = data {
        response["data"] = json!(data);
    }
    Ok(response)
}
