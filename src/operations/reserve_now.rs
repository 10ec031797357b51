//! ReserveNow (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config;
use crate::domain::reservation::{Reservation, ReserveOutcome};
use crate::domain::Model;
use crate::rpc::frame::CallError;
use crate::support::clock::parse_iso_8601;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    connector_id: u32,
    expiry_date: String,
    id_tag: String,
    parent_id_tag: Option<String>,
    reservation_id: i32,
}

fn reply(status: &str) -> Value {
    json!({ "status": status })
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let Some(expiry_date) = parse_iso_8601(&request.expiry_date) else {
        return Err(CallError::property_violation("invalid expiryDate"));
    };

    if request.connector_id == 0 {
        if model.config.bool(config::RESERVE_CONNECTOR_ZERO_SUPPORTED) != Some(true) {
            return Ok(reply("Rejected"));
        }
    } else {
        let Some(connector) = model.connector(request.connector_id) else {
            return Ok(reply("Rejected"));
        };
        if connector.current_status()
            == Some(crate::operations::types::ChargePointStatus::Faulted)
        {
            return Ok(reply("Faulted"));
        }
        if !connector.is_operative() {
            return Ok(reply("Unavailable"));
        }
        if connector.has_open_transaction() {
            return Ok(reply("Occupied"));
        }
    }

    let outcome = model.reservations.reserve(Reservation {
        reservation_id: request.reservation_id,
        connector_id: request.connector_id,
        id_tag: request.id_tag,
        parent_id_tag: request.parent_id_tag,
        expiry_date,
    });
    Ok(reply(match outcome {
        ReserveOutcome::Accepted => "Accepted",
        ReserveOutcome::Occupied => "Occupied",
        ReserveOutcome::Unavailable => "Unavailable",
        ReserveOutcome::Rejected => "Rejected",
    }))
}
