//! Authorize (CP → CS).

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::config;
use crate::domain::Model;

use super::types::IdTagInfo;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    id_tag_info: IdTagInfo,
}

pub fn build_request(id_tag: &str) -> Value {
    json!({ "idTag": id_tag })
}

pub fn on_conf(model: &mut Model, connector_id: u32, id_tag: &str, payload: &Value) {
    let response: Response = match serde_json::from_value(payload.clone()) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed Authorize.conf");
            on_failure(model, connector_id, id_tag);
            return;
        }
    };
    if model.config.bool(config::AUTHORIZATION_CACHE_ENABLED) == Some(true) {
        let uptime = model.time.uptime_ms();
        model
            .auth
            .cache_verdict(id_tag, response.id_tag_info.clone(), uptime);
    }
    let now = model.now();
    let accepted = response.id_tag_info.is_valid(now);
    model.with_connector(connector_id, |c, sv| {
        c.on_authorize_result(sv, id_tag, accepted);
    });
}

/// Timeout, abort or a CallError all fall back to the offline
/// authorization policy.
pub fn on_failure(model: &mut Model, connector_id: u32, id_tag: &str) {
    let id_tag = id_tag.to_string();
    model.with_connector(connector_id, |c, sv| {
        c.on_authorize_timeout(sv, &id_tag);
    });
}
