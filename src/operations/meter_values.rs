//! MeterValues (CP → CS).

use serde_json::{json, Value};

use crate::domain::transaction::SyncState;
use crate::domain::Model;

use super::types::MeterValue;

/// `None` drops the call: the bound transaction concluded or aborted
/// while the request was queued.
pub fn build_request(
    model: &Model,
    connector_id: u32,
    tx_nr: Option<u32>,
    meter_values: &[MeterValue],
) -> Option<Value> {
    let mut payload = json!({
        "connectorId": connector_id,
        "meterValue": serde_json::to_value(meter_values).ok()?,
    });
    if let Some(tx_nr) = tx_nr {
        let tx = model
            .connector(connector_id)
            .and_then(|c| c.transaction.as_ref())
            .filter(|tx| tx.tx_nr == tx_nr)
            .cloned()
            .or_else(|| model.tx_store.load(connector_id, tx_nr))?;
        if tx.silent || tx.is_completed() || tx.is_aborted() {
            return None;
        }
        if tx.started_sync != SyncState::Confirmed {
            return None;
        }
        payload["transactionId"] = json!(tx.transaction_id);
    }
    Some(payload)
}
