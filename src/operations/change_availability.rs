//! ChangeAvailability (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::Model;
use crate::rpc::frame::CallError;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
enum AvailabilityType {
    Operative,
    Inoperative,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    connector_id: u32,
    #[serde(rename = "type")]
    kind: AvailabilityType,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let operative = request.kind == AvailabilityType::Operative;

    let ids: Vec<u32> = if request.connector_id == 0 {
        model.connectors.iter().map(|c| c.id()).collect()
    } else if model.connector(request.connector_id).is_some() {
        vec![request.connector_id]
    } else {
        return Ok(json!({ "status": "Rejected" }));
    };

    let mut all_immediate = true;
    for id in ids {
        let applied = model
            .with_connector(id, |c, sv| c.set_availability(sv, operative))
            .unwrap_or(true);
        all_immediate &= applied;
    }
    if request.connector_id == 0 {
        model.set_cp_availability(operative);
    }

    let status = if all_immediate { "Accepted" } else { "Scheduled" };
    Ok(json!({ "status": status }))
}
