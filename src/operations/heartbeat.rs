//! Heartbeat (CP → CS).

use serde_json::{json, Value};

use crate::domain::Model;
use crate::support::clock::parse_iso_8601;

pub fn build_request() -> Value {
    json!({})
}

pub fn on_conf(model: &mut Model, payload: &Value) {
    // The heartbeat doubles as the clock source.
    if let Some(cs_time) = payload
        .get("currentTime")
        .and_then(|v| v.as_str())
        .and_then(parse_iso_8601)
    {
        model.time.sync_to(cs_time);
    }
}
