//! ChangeConfiguration (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::SetResult;
use crate::domain::Model;
use crate::rpc::frame::CallError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    key: String,
    value: ConfigurationValue,
}

/// The Central System may send the value as a string, a number or a
/// boolean; everything funnels into the registry's string recognizer.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConfigurationValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl ConfigurationValue {
    fn into_wire_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::Flag(b) => b.to_string(),
        }
    }
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;
    let raw = request.value.into_wire_string();
    let status = match model.config.set_from_wire(&request.key, &raw) {
        SetResult::Accepted => "Accepted",
        SetResult::Rejected => "Rejected",
        SetResult::RebootRequired => "RebootRequired",
        SetResult::NotSupported => "NotSupported",
    };
    info!(key = %request.key, status, "ChangeConfiguration");
    Ok(json!({ "status": status }))
}
