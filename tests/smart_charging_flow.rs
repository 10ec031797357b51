//! Smart charging over the wire: profile stacking and composite
//! schedules.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;

use common::Harness;
use ocpp_chargepoint::support::clock::to_iso_8601;
use ocpp_chargepoint::Clock;

fn tx_default_profile(profile_id: i32, limit: f64, start: &str) -> serde_json::Value {
    json!({
        "chargingProfileId": profile_id,
        "stackLevel": 0,
        "chargingProfilePurpose": "TxDefaultProfile",
        "chargingProfileKind": "Absolute",
        "chargingSchedule": {
            "duration": 86400,
            "startSchedule": start,
            "chargingRateUnit": "A",
            "chargingSchedulePeriod": [ { "startPeriod": 0, "limit": limit } ]
        }
    })
}

#[test]
fn charge_point_max_caps_the_default_profile() {
    let mut h = Harness::new();
    let limits: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let limits = limits.clone();
        h.cp.set_smart_charging_output(
            1,
            Box::new(move |rate| {
                if let Some(amps) = rate.current_a {
                    limits.borrow_mut().push(amps);
                }
            }),
        );
    }
    h.connect();
    h.boot_accept();
    let start = to_iso_8601(h.clock.now());

    let id = h.push_cs_call(
        "SetChargingProfile",
        json!({ "connectorId": 1, "csChargingProfiles": tx_default_profile(1, 16.0, &start) }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");
    h.step();
    assert_eq!(limits.borrow().last().copied(), Some(16.0));

    let id = h.push_cs_call(
        "SetChargingProfile",
        json!({
            "connectorId": 0,
            "csChargingProfiles": {
                "chargingProfileId": 2,
                "stackLevel": 0,
                "chargingProfilePurpose": "ChargePointMaxProfile",
                "chargingProfileKind": "Absolute",
                "chargingSchedule": {
                    "duration": 86400,
                    "startSchedule": start,
                    "chargingRateUnit": "A",
                    "chargingSchedulePeriod": [ { "startPeriod": 0, "limit": 10.0 } ]
                }
            }
        }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");
    h.step();
    assert_eq!(limits.borrow().last().copied(), Some(10.0));

    let id = h.push_cs_call(
        "ClearChargingProfile",
        json!({ "chargingProfilePurpose": "ChargePointMaxProfile" }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");
    h.step();
    assert_eq!(limits.borrow().last().copied(), Some(16.0));

    // Clearing something that matches nothing reports Unknown.
    let id = h.push_cs_call("ClearChargingProfile", json!({ "id": 999 }));
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Unknown");
}

#[test]
fn composite_schedule_reports_the_period_boundaries() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();
    let start = to_iso_8601(h.clock.now());

    let id = h.push_cs_call(
        "SetChargingProfile",
        json!({
            "connectorId": 1,
            "csChargingProfiles": {
                "chargingProfileId": 5,
                "stackLevel": 0,
                "chargingProfilePurpose": "TxDefaultProfile",
                "chargingProfileKind": "Absolute",
                "chargingSchedule": {
                    "duration": 3600,
                    "startSchedule": start,
                    "chargingRateUnit": "A",
                    "chargingSchedulePeriod": [
                        { "startPeriod": 0, "limit": 32.0 },
                        { "startPeriod": 1800, "limit": 16.0 }
                    ]
                }
            }
        }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Accepted");

    let id = h.push_cs_call(
        "GetCompositeSchedule",
        json!({ "connectorId": 1, "duration": 3600, "chargingRateUnit": "A" }),
    );
    let reply = h.reply_for(&id).unwrap();
    assert_eq!(reply["status"], "Accepted");
    assert_eq!(reply["connectorId"], 1);
    let periods = reply["chargingSchedule"]["chargingSchedulePeriod"]
        .as_array()
        .unwrap();
    assert_eq!(periods.len(), 2);
    assert_eq!(periods[0]["startPeriod"], 0);
    assert_eq!(periods[0]["limit"], 32.0);
    assert_eq!(periods[1]["startPeriod"], 1800);
    assert_eq!(periods[1]["limit"], 16.0);
}

#[test]
fn tx_profile_without_running_transaction_is_rejected() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();
    let start = to_iso_8601(h.clock.now());

    let id = h.push_cs_call(
        "SetChargingProfile",
        json!({
            "connectorId": 1,
            "csChargingProfiles": {
                "chargingProfileId": 7,
                "stackLevel": 0,
                "chargingProfilePurpose": "TxProfile",
                "chargingProfileKind": "Absolute",
                "chargingSchedule": {
                    "startSchedule": start,
                    "chargingRateUnit": "A",
                    "chargingSchedulePeriod": [ { "startPeriod": 0, "limit": 8.0 } ]
                }
            }
        }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Rejected");
}

#[test]
fn malformed_profile_is_rejected() {
    let mut h = Harness::new();
    h.connect();
    h.boot_accept();

    // First period must start at offset 0.
    let id = h.push_cs_call(
        "SetChargingProfile",
        json!({
            "connectorId": 1,
            "csChargingProfiles": {
                "chargingProfileId": 8,
                "stackLevel": 0,
                "chargingProfilePurpose": "TxDefaultProfile",
                "chargingProfileKind": "Relative",
                "chargingSchedule": {
                    "chargingRateUnit": "A",
                    "chargingSchedulePeriod": [ { "startPeriod": 60, "limit": 8.0 } ]
                }
            }
        }),
    );
    assert_eq!(h.reply_for(&id).unwrap()["status"], "Rejected");
}
