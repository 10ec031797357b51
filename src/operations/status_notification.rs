//! StatusNotification (CP → CS).

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::support::clock::to_iso_8601;

use super::types::ChargePointStatus;

pub fn build_request(
    connector_id: u32,
    status: ChargePointStatus,
    error_code: &str,
    timestamp: DateTime<Utc>,
) -> Value {
    json!({
        "connectorId": connector_id,
        "errorCode": error_code,
        "status": status,
        "timestamp": to_iso_8601(timestamp),
    })
}
