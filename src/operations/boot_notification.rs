//! BootNotification (CP → CS).

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::config;
use crate::domain::boot::RegistrationStatus;
use crate::domain::Model;
use crate::support::clock::parse_iso_8601;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    status: RegistrationStatus,
    current_time: String,
    interval: i32,
}

pub fn build_request(model: &Model) -> Value {
    // BootCredentials serializes straight into the request shape.
    serde_json::to_value(model.boot.credentials()).unwrap_or(Value::Null)
}

pub fn on_conf(model: &mut Model, payload: &Value) {
    let response: Response = match serde_json::from_value(payload.clone()) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed BootNotification.conf");
            model.boot.on_failure();
            return;
        }
    };
    if let Some(cs_time) = parse_iso_8601(&response.current_time) {
        model.time.sync_to(cs_time);
    }
    let newly_accepted = model.boot.on_conf(response.status, response.interval);
    if response.status == RegistrationStatus::Accepted && response.interval > 0 {
        model.config.set(
            config::HEARTBEAT_INTERVAL,
            config::ConfigValue::Int(response.interval),
        );
    }
    if newly_accepted {
        model.on_boot_accepted();
    }
}

pub fn on_failure(model: &mut Model) {
    model.boot.on_failure();
}
