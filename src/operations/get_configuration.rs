//! GetConfiguration (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config;
use crate::domain::Model;
use crate::rpc::frame::CallError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    #[serde(default)]
    key: Vec<String>,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload).unwrap_or_default();
    let max_keys = model
        .config
        .int(config::GET_CONFIGURATION_MAX_KEYS)
        .unwrap_or(50)
        .max(1) as usize;

    let mut configuration_key = Vec::new();
    let mut unknown_key: Vec<String> = Vec::new();

    if request.key.is_empty() {
        for entry in model.config.iter().take(max_keys) {
            configuration_key.push(json!({
                "key": entry.key,
                "readonly": entry.readonly,
                "value": entry.value.to_wire_string(),
            }));
        }
    } else {
        for key in request.key.iter().take(max_keys) {
            match model.config.get(key) {
                Some(entry) => configuration_key.push(json!({
                    "key": entry.key,
                    "readonly": entry.readonly,
                    "value": entry.value.to_wire_string(),
                })),
                None => unknown_key.push(key.clone()),
            }
        }
    }

    let mut response = json!({ "configurationKey": configuration_key });
    if !unknown_key.is_empty() {
        response["unknownKey"] = json!(unknown_key);
    }
    Ok(response)
}
