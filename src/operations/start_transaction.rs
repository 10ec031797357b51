//! StartTransaction (CP → CS).

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config;
use crate::domain::transaction::{SyncState, Transaction};
use crate::domain::Model;
use crate::support::clock::to_iso_8601;

use super::types::{AuthorizationStatus, IdTagInfo};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    transaction_id: i32,
    id_tag_info: IdTagInfo,
}

fn lookup(model: &Model, connector_id: u32, tx_nr: u32) -> Option<Transaction> {
    // The connector's live session is authoritative; older ring slots are
    // only touched for replay after a reboot.
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

/// `None` drops the call: the transaction vanished or aborted while the
/// request waited in the queue.
pub fn build_request(model: &Model, connector_id: u32, tx_nr: u32) -> Option<Value> {
    let tx = lookup(model, connector_id, tx_nr)?;
    if tx.silent || !tx.has_started() || tx.is_aborted() {
        return None;
    }
    let mut payload = json!({
        "connectorId": connector_id,
        "idTag": tx.id_tag,
        "meterStart": tx.meter_start,
        "timestamp": to_iso_8601(tx.start_timestamp?),
    });
    if let Some(reservation_id) = tx.reservation_id {
        payload["reservationId"] = json!(reservation_id);
    }
    Some(payload)
}

pub fn on_conf(model: &mut Model, connector_id: u32, tx_nr: u32, payload: &Value) {
    let response: Response = match serde_json::from_value(payload.clone()) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed StartTransaction.conf");
            return;
        }
    };
    let Some(mut tx) = lookup(model, connector_id, tx_nr) else {
        warn!(connector_id, tx_nr, "StartTransaction.conf for unknown transaction");
        return;
    };

    tx.transaction_id = response.transaction_id;
    tx.started_sync = SyncState::Confirmed;
    info!(
        connector_id,
        tx_nr,
        transaction_id = response.transaction_id,
        "transaction confirmed"
    );
    if let Some(reservation_id) = tx.reservation_id {
        model.reservations.consume(reservation_id);
    }
    store_back(model, tx);

    if model.config.bool(config::AUTHORIZATION_CACHE_ENABLED) == Some(true) {
        let id_tag = model
            .tx_store
            .load(connector_id, tx_nr)
            .map(|tx| tx.id_tag.clone());
        if let Some(id_tag) = id_tag {
            let uptime = model.time.uptime_ms();
            model
                .auth
                .cache_verdict(&id_tag, response.id_tag_info.clone(), uptime);
        }
    }

    if response.id_tag_info.status != AuthorizationStatus::Accepted {
        // De-authorization through the start confirmation.
        let is_current = model
            .connector(connector_id)
            .and_then(|c| c.transaction.as_ref())
            .map(|tx| tx.tx_nr == tx_nr)
            .unwrap_or(false);
        if is_current {
            model.with_connector(connector_id, |c, sv| c.on_deauthorized(sv));
        }
    }
}

/// Give up reporting: the session keeps running locally, unreported.
pub fn on_failure(model: &mut Model, connector_id: u32, tx_nr: u32) {
    let Some(mut tx) = lookup(model, connector_id, tx_nr) else { return };
    if tx.started_sync == SyncState::Confirmed {
        return;
    }
    warn!(connector_id, tx_nr, "StartTransaction undeliverable, session goes silent");
    tx.silent = true;
    store_back(model, tx);
}
