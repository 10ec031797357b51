//! Protocol-level behaviour of the RPC engine over the wire.

mod common;

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::json;

use common::Harness;
use ocpp_chargepoint::{Clock, UnlockStatus};

#[test]
fn unknown_action_answers_not_implemented() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();

    let id = h.push_cs_call("FooBar", json!({}));
    let (code, _description) = h.error_for(&id).expect("error frame");
    assert_eq!(code, "NotImplemented");
}

#[test]
fn malformed_call_answers_protocol_error_with_recovered_id() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();

    h.net
        .borrow_mut()
        .push_text(r#"[2, "weird-7", "BootNotification", {broken"#);
    h.step();
    let (code, _description) = h.error_for("weird-7").expect("error frame");
    assert_eq!(code, "ProtocolError");

    // A frame with no recoverable id is silently dropped; the engine
    // keeps working.
    h.net.borrow_mut().push_text("garbage");
    h.step();
    let id = h.push_cs_call("GetLocalListVersion", json!({}));
    assert!(h.reply_for(&id).is_some());
}

#[test]
fn oversized_call_is_rejected_before_parsing() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();

    let id = h.push_cs_call(
        "ChangeConfiguration",
        json!({ "key": "MaxMessageSize", "value": "1024" }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");

    let blob = "x".repeat(2000);
    h.net
        .borrow_mut()
        .push_text(format!(r#"[2, "big-1", "DataTransfer", {{"vendorId": "{blob}"}}]"#));
    h.step();
    let (code, _description) = h.error_for("big-1").expect("error frame");
    assert_eq!(code, "GenericError");
}

#[test]
fn replies_drain_in_arrival_order_even_when_deferred() {
    let mut h = Harness::new();
    // The unlock actuator needs a few polls before it resolves.
    let polls = Rc::new(Cell::new(0u32));
    {
        let polls = polls.clone();
        h.cp.set_on_unlock_connector(
            1,
            Box::new(move || {
                polls.set(polls.get() + 1);
                if polls.get() < 4 {
                    UnlockStatus::Pending
                } else {
                    UnlockStatus::Unlocked
                }
            }),
        );
    }
    h.connect();
    h.boot_accept();

    let unlock_id = h.push_cs_call("UnlockConnector", json!({ "connectorId": 1 }));
    let version_id = h.push_cs_call("GetLocalListVersion", json!({}));

    for _ in 0..10 {
        h.step();
    }
    h.drain_sent();

    let unlock_pos = h.replies.iter().position(|(id, _)| id == &unlock_id);
    let version_pos = h.replies.iter().position(|(id, _)| id == &version_id);
    let unlock_pos = unlock_pos.expect("unlock answered");
    let version_pos = version_pos.expect("version answered");
    assert!(
        unlock_pos < version_pos,
        "replies must leave in arrival order"
    );
    assert_eq!(h.replies[unlock_pos].1["status"], "Unlocked");
}

#[test]
fn stale_result_is_dropped_without_side_effects() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();

    h.net
        .borrow_mut()
        .push_text(r#"[3, "no-such-id", {"status": "Accepted"}]"#);
    h.step();

    // The engine is still healthy.
    let id = h.push_cs_call("GetLocalListVersion", json!({}));
    assert!(h.reply_for(&id).is_some());
}

#[test]
fn configuration_round_trip_over_the_wire() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();

    // Numbers may arrive as strings or JSON numbers.
    let id = h.push_cs_call(
        "ChangeConfiguration",
        json!({ "key": "MeterValueSampleInterval", "value": 30 }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");

    let id = h.push_cs_call(
        "GetConfiguration",
        json!({ "key": ["MeterValueSampleInterval", "NoSuchKey"] }),
    );
    let reply = h.reply_for(&id).unwrap();
    let entries = reply["configurationKey"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["key"], "MeterValueSampleInterval");
    assert_eq!(entries[0]["value"], "30");
    assert_eq!(entries[0]["readonly"], false);
    assert_eq!(reply["unknownKey"].as_array().unwrap()[0], "NoSuchKey");

    // Read-only keys refuse writes.
    let id = h.push_cs_call(
        "ChangeConfiguration",
        json!({ "key": "NumberOfConnectors", "value": "5" }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Rejected");

    // Unknown keys are NotSupported.
    let id = h.push_cs_call(
        "ChangeConfiguration",
        json!({ "key": "NoSuchKey", "value": "1" }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "NotSupported");
}

#[test]
fn outbound_message_ids_are_unique() {
    let mut h = Harness::new();
    h.connect();

    let mut ids = HashSet::new();
    let mut count = 0;
    // Collect the boot notification plus the initial status round.
    for _ in 0..30 {
        h.step();
        for call in h.drain_sent() {
            count += 1;
            ids.insert(call.message_id.clone());
            if call.action == "BootNotification" {
                let now = ocpp_chargepoint::support::clock::to_iso_8601(h.clock.now());
                h.reply(
                    &call,
                    json!({ "status": "Accepted", "currentTime": now, "interval": 3600 }),
                );
            } else {
                h.reply(&call, json!({}));
            }
        }
    }
    assert!(count >= 3);
    assert_eq!(ids.len(), count, "message ids must never repeat");
}

#[test]
fn trigger_message_round_trip() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();

    let id = h.push_cs_call(
        "TriggerMessage",
        json!({ "requestedMessage": "StatusNotification", "connectorId": 1 }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");
    let status = h.expect_call("StatusNotification", 20);
    assert_eq!(status.payload["connectorId"], 1);
    h.reply(&status, json!({}));

    let id = h.push_cs_call(
        "TriggerMessage",
        json!({ "requestedMessage": "Heartbeat" }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");
    let heartbeat = h.expect_call("Heartbeat", 20);
    h.reply(
        &heartbeat,
        json!({ "currentTime": ocpp_chargepoint::support::clock::to_iso_8601(h.clock.now()) }),
    );

    let id = h.push_cs_call(
        "TriggerMessage",
        json!({ "requestedMessage": "SignedUpdateFirmwareStatusNotification" }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "NotImplemented");
}

#[test]
fn reservation_round_trip() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();

    let expiry = ocpp_chargepoint::support::clock::to_iso_8601(
        h.clock.now() + chrono::Duration::hours(1),
    );
    let id = h.push_cs_call(
        "ReserveNow",
        json!({
            "connectorId": 1,
            "expiryDate": expiry,
            "idTag": "RESV01",
            "reservationId": 5,
        }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");

    // The connector reports Reserved.
    let status = h.expect_call("StatusNotification", 30);
    assert_eq!(status.payload["status"], "Reserved");
    h.reply(&status, json!({}));

    // Someone else's session is refused.
    assert!(!h.cp.begin_transaction(1, "INTRUDER"));

    let id = h.push_cs_call("CancelReservation", json!({ "reservationId": 5 }));
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");
    let id = h.push_cs_call("CancelReservation", json!({ "reservationId": 5 }));
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Rejected");
}
