//! TriggerMessage (CS → CP).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::Model;
use crate::operations::operation::{Operation, Request as OutboundRequest};
use crate::rpc::frame::CallError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    requested_message: String,
    connector_id: Option<u32>,
}

pub fn handle(model: &mut Model, payload: Value) -> Result<Value, CallError> {
    let request: Request = serde_json::from_value(payload)
        .map_err(|e| CallError::formation_violation(e.to_string()))?;

    if let Some(id) = request.connector_id {
        if id != 0 && model.connector(id).is_none() {
            return Ok(json!({ "status": "Rejected" }));
        }
    }

    let status = match request.requested_message.as_str() {
        "BootNotification" => {
            model.with_services(|sv| {
                sv.outbox.push(OutboundRequest::new(Operation::BootNotification));
            });
            "Accepted"
        }
        "Heartbeat" => {
            let uptime = model.time.uptime_ms();
            model.heartbeat.mark_sent(uptime);
            model.with_services(|sv| {
                sv.outbox.push(OutboundRequest::new(Operation::Heartbeat));
            });
            "Accepted"
        }
        "MeterValues" => {
            let ids: Vec<u32> = match request.connector_id {
                Some(0) | None => model.connectors.iter().map(|c| c.id()).collect(),
                Some(id) => vec![id],
            };
            for id in ids {
                model.with_connector(id, |c, sv| {
                    let tx = c.transaction.clone();
                    c.metering.trigger_sample(sv, tx.as_ref());
                });
            }
            "Accepted"
        }
        "StatusNotification" => {
            let ids: Vec<u32> = match request.connector_id {
                Some(0) | None => model.connectors.iter().map(|c| c.id()).collect(),
                Some(id) => vec![id],
            };
            for id in ids {
                model.with_connector(id, |c, sv| c.trigger_status_notification(sv));
            }
            "Accepted"
        }
        "DiagnosticsStatusNotification" => {
            let status = model.diagnostics.current_status();
            model.with_services(|sv| {
                sv.outbox.push(OutboundRequest::new(
                    Operation::DiagnosticsStatusNotification { status },
                ));
            });
            "Accepted"
        }
        "FirmwareStatusNotification" => {
            let status = model.firmware.current_status();
            model.with_services(|sv| {
                sv.outbox.push(OutboundRequest::new(
                    Operation::FirmwareStatusNotification { status },
                ));
            });
            "Accepted"
        }
        _ => "NotImplemented",
    };
    Ok(json!({ "status": status }))
}
