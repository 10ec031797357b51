//! RemoteStopTransaction (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::domain::connector::TxNotification;
use crate::domain::Model;
use crate::rpc::frame::CallError;

use super::types::Reason;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    transaction_id: i32,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;

    let target = model
        .connectors
        .iter()
        .find(|c| {
            c.is_transaction_running() && c.transaction_id() == Some(request.transaction_id)
        })
        .map(|c| c.id());

    let Some(connector_id) = target else {
        return Ok(json!({ "status": "Rejected" }));
    };
    info!(connector_id, transaction_id = request.transaction_id, "remote stop");
    model.with_connector(connector_id, |c, sv| {
        c.end_transaction(sv, Reason::Remote, None);
        sv.notify(connector_id, TxNotification::RemoteStop);
    });
    Ok(json!({ "status": "Accepted" }))
}
