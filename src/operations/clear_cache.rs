//! ClearCache (CS → CP).

use serde_json::{json, Value};

use crate::domain::Model;
use crate::rpc::frame::CallError;

pub fn handle(model: &mut Model, _payload: Value) -> Result<Value, CallError> {
    model.auth.clear_cache();
    Ok(json!({ "status": "Accepted" }))
}
