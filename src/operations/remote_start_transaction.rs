//! RemoteStartTransaction (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config;
use crate::domain::connector::TxNotification;
use crate::domain::Model;
use crate::rpc::frame::CallError;

use super::types::{ChargingProfile, ChargingProfilePurpose};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    id_tag: String,
    connector_id: Option<u32>,
    charging_profile: Option<ChargingProfile>,
}

fn rejected() -> Value {
    json!({ "status": "Rejected" })
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;

    // Pick the target connector: the requested one, or the first one that
    // can take a session.
    let connector_id = match request.connector_id {
        Some(id) => {
            let suitable = model
                .connector(id)
                .map(|c| !c.has_open_transaction() && c.is_operative())
                .unwrap_or(false);
            if !suitable {
                return Ok(rejected());
            }
            id
        }
        None => {
            let found = model
                .connectors
                .iter()
                .find(|c| !c.has_open_transaction() && c.is_operative())
                .map(|c| c.id());
            match found {
                Some(id) => id,
                None => return Ok(rejected()),
            }
        }
    };

    if let Some(profile) = request.charging_profile {
        if profile.charging_profile_purpose != ChargingProfilePurpose::TxProfile {
            return Ok(rejected());
        }
        let now = model.now();
        if !model.smart_charging.install(connector_id, profile, now) {
            return Ok(rejected());
        }
    }

    let pre_authorized =
        model.config.bool(config::AUTHORIZE_REMOTE_TX_REQUESTS) != Some(true);
    let id_tag = request.id_tag.clone();
    let outcome = model
        .with_connector(connector_id, |c, sv| {
            let result = c.begin_transaction(sv, &id_tag, pre_authorized);
            if result.is_ok() {
                sv.notify(connector_id, TxNotification::RemoteStart);
            }
            result
        })
        .unwrap_or(Err(crate::domain::connector::BeginTxError::Occupied));

    match outcome {
        Ok(()) => {
            info!(connector_id, id_tag = %request.id_tag, "remote start accepted");
            Ok(json!({ "status": "Accepted" }))
        }
        Err(e) => {
            warn!(connector_id, error = ?e, "remote start rejected");
            Ok(rejected())
        }
    }
}
