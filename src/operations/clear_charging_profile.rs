//! ClearChargingProfile (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::smart_charging::ClearProfileFilter;
use crate::domain::Model;
use crate::rpc::frame::CallError;

use super::types::ChargingProfilePurpose;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    id: Option<i32>,
    connector_id: Option<u32>,
    charging_profile_purpose: Option<ChargingProfilePurpose>,
    stack_level: Option<i32>,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload).unwrap_or_default();
    let removed = model.smart_charging.clear(ClearProfileFilter {
        profile_id: request.id,
        connector_id: request.connector_id,
        purpose: request.charging_profile_purpose,
        stack_level: request.stack_level,
    });
    let status = if removed { "Accepted" } else { "Unknown" };
    Ok(json!({ "status": status }))
}
