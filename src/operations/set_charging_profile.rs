//! SetChargingProfile (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::domain::Model;
use crate::rpc::frame::CallError;

use super::types::{ChargingProfile, ChargingProfilePurpose};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    connector_id: u32,
    cs_charging_profiles: ChargingProfile,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let profile = request.cs_charging_profiles;

    // A TxProfile targets the transaction running right now.
    if profile.charging_profile_purpose == ChargingProfilePurpose::TxProfile {
        let running_id = model
            .connector(request.connector_id)
            .filter(|c| c.is_transaction_running())
            .and_then(|c| c.transaction_id());
        let matches = match (profile.transaction_id, running_id) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(wanted), Some(running)) => wanted == running,
        };
        if !matches {
            warn!(
                connector_id = request.connector_id,
                "TxProfile does not match a running transaction"
            );
            return Ok(json!({ "status": "Rejected" }));
        }
    }

    let now = model.now();
    let status = if model
        .smart_charging
        .install(request.connector_id, profile, now)
    {
        "Accepted"
    } else {
        "Rejected"
    };
    Ok(json!({ "status": status }))
}
