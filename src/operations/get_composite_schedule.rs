//! GetCompositeSchedule (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config;
use crate::domain::smart_charging::{SessionContext, MAX_SCHEDULE_PERIODS};
use crate::domain::Model;
use crate::rpc::frame::CallError;
use crate::support::clock::to_iso_8601;

use super::types::ChargingRateUnit;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    connector_id: u32,
    duration: i32,
    charging_rate_unit: Option<ChargingRateUnit>,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;

    if request.connector_id != 0 && model.connector(request.connector_id).is_none() {
        return Ok(json!({ "status": "Rejected" }));
    }

    let session = model
        .connector(request.connector_id)
        .and_then(|c| c.transaction.as_ref())
        .filter(|tx| tx.is_running())
        .map(|tx| SessionContext {
            start: tx.start_timestamp,
            transaction_id: Some(tx.transaction_id).filter(|id| *id > 0),
        })
        .unwrap_or_default();

    let max_periods = model
        .config
        .int(config::CHARGING_SCHEDULE_MAX_PERIODS)
        .unwrap_or(MAX_SCHEDULE_PERIODS as i32)
        .max(1) as usize;
    let now = model.now();
    let schedule = model.smart_charging.composite_schedule(
        request.connector_id,
        request.duration,
        request.charging_rate_unit,
        now,
        &session,
        max_periods,
    );

    Ok(json!({
        "status": "Accepted",
        "connectorId": request.connector_id,
        "scheduleStart": to_iso_8601(now),
        "chargingSchedule": serde_json::to_value(schedule)
            .map_err(|e| CallError::internal(e.to_string()))?,
    }))
}
