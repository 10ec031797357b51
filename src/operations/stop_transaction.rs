//! StopTransaction (CP → CS).

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config;
use crate::domain::transaction::{SyncState, Transaction, TX_ID_NONE};
use crate::domain::Model;
use crate::support::clock::to_iso_8601;

use super::types::{IdTagInfo, MeterValue, Reason};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    id_tag_info: Option<IdTagInfo>,
}

fn lookup(model: &Model, connector_id: u32, tx_nr: u32) -> Option<Transaction> {
    if let Some(tx) = model
        .connector(connector_id)
        .and_then(|c| c.transaction.as_ref())
    {
        if tx.tx_nr == tx_nr {
            return Some(tx.clone());
        }
    }
    model.tx_store.load(connector_id, tx_nr)
}

fn store_back(model: &mut Model, tx: Transaction) {
    let connector_id = tx.connector_id;
    let tx_nr = tx.tx_nr;
    model.tx_store.commit(&tx);
    if let Some(current) = model
        .connector_mut(connector_id)
        .and_then(|c| c.transaction.as_mut())
    {
        if current.tx_nr == tx_nr {
            *current = tx;
        }
    }
}

/// `None` drops the call (silent session, or the start report never went
/// through so there is no transaction id to stop).
pub fn build_request(model: &mut Model, connector_id: u32, tx_nr: u32) -> Option<Value> {
    let tx = lookup(model, connector_id, tx_nr)?;
    if tx.silent || !tx.has_stopped() || tx.started_sync != SyncState::Confirmed {
        return None;
    }
    if tx.transaction_id == TX_ID_NONE {
        return None;
    }

    let transaction_data: Vec<MeterValue> = model
        .with_connector(connector_id, |c, sv| {
            c.metering.transaction_data(sv, tx_nr)
        })
        .unwrap_or_default();

    let reason = tx.stop_reason.unwrap_or(Reason::Local).wire_value();
    let mut payload = json!({
        "transactionId": tx.transaction_id,
        "meterStop": tx.meter_stop,
        "timestamp": to_iso_8601(tx.stop_timestamp?),
        "reason": reason,
    });
    if let Some(stop_id_tag) = &tx.stop_id_tag {
        payload["idTag"] = json!(stop_id_tag);
    }
    if !transaction_data.is_empty() {
        payload["transactionData"] = serde_json::to_value(transaction_data).ok()?;
    }
    Some(payload)
}

pub fn on_conf(model: &mut Model, connector_id: u32, tx_nr: u32, payload: &Value) {
    let response: Response = serde_json::from_value(payload.clone()).unwrap_or(Response {
        id_tag_info: None,
    });
    let Some(mut tx) = lookup(model, connector_id, tx_nr) else {
        warn!(connector_id, tx_nr, "StopTransaction.conf for unknown transaction");
        return;
    };
    tx.stopped_sync = SyncState::Confirmed;
    info!(connector_id, tx_nr, "transaction close confirmed");

    if let Some(info) = response.id_tag_info {
        if model.config.bool(config::AUTHORIZATION_CACHE_ENABLED) == Some(true) {
            let tag = tx.stop_id_tag.clone().unwrap_or_else(|| tx.id_tag.clone());
            let uptime = model.time.uptime_ms();
            model.auth.cache_verdict(&tag, info, uptime);
        }
    }
    store_back(model, tx);
}

/// Give up reporting the stop; the record stays on disk for the ring to
/// trim eventually.
pub fn on_failure(model: &mut Model, connector_id: u32, tx_nr: u32) {
    let Some(mut tx) = lookup(model, connector_id, tx_nr) else { return };
    if tx.stopped_sync == SyncState::Confirmed {
        return;
    }
    warn!(connector_id, tx_nr, "StopTransaction undeliverable, session goes silent");
    tx.silent = true;
    store_back(model, tx);
}
