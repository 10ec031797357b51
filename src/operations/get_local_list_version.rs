//! GetLocalListVersion (CS → CP).

use serde_json::{json, Value};

use crate::config;
use crate::domain::Model;
use crate::rpc::frame::CallError;

pub fn handle(model: &mut Model, _payload: Value) -> Result<Value, CallError> {
    // -1 tells the Central System the feature is switched off.
    let version = if model.config.bool(config::LOCAL_AUTH_LIST_ENABLED) == Some(true) {
        model.auth.list_version()
    } else {
        -1
    };
    Ok(json!({ "listVersion": version }))
}
