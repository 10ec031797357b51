//! Shared test harness: a charge point wired to a loopback transport, an
//! in-memory filesystem and a manually advanced clock, plus a scripted
//! Central System on the other end of the wire.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use ocpp_chargepoint::support::clock::to_iso_8601;
use ocpp_chargepoint::{
    BootCredentials, ChargePoint, ChargePointOptions, Clock, LoopbackTransport, MemoryFilesystem,
    SharedFilesystem, SimClock, Transport, TransportEvent,
};

/// Transport handle the test keeps while the charge point owns the other
/// end.
pub struct SharedTransport(pub Rc<RefCell<LoopbackTransport>>);

impl Transport for SharedTransport {
    fn send_text(&mut self, text: &str) -> bool {
        self.0.borrow_mut().send_text(text)
    }

    fn is_connected(&self) -> bool {
        self.0.borrow().is_connected()
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.0.borrow_mut().poll()
    }
}

/// One `[2, id, action, payload]` frame the charge point sent.
#[derive(Debug, Clone)]
pub struct SentCall {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

pub struct Harness {
    pub cp: ChargePoint,
    pub net: Rc<RefCell<LoopbackTransport>>,
    pub clock: Rc<SimClock>,
    pub fs: SharedFilesystem,
    /// `[3, id, payload]` replies to CS-initiated calls.
    pub replies: Vec<(String, Value)>,
    /// `[4, id, code, description, details]` errors.
    pub errors: Vec<(String, String, String)>,
    next_cs_id: u32,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_fs(Arc::new(MemoryFilesystem::new()))
    }

    pub fn with_fs(fs: SharedFilesystem) -> Self {
        let clock = Rc::new(SimClock::new(t0()));
        let net = Rc::new(RefCell::new(LoopbackTransport::new()));
        let credentials = BootCredentials {
            charge_point_vendor: "VendorX".into(),
            charge_point_model: "ModelY".into(),
            firmware_version: Some("1.0.0".into()),
            ..Default::default()
        };
        let cp = ChargePoint::new(
            ChargePointOptions::new(Box::new(SharedTransport(net.clone())), credentials)
                .with_filesystem(fs.clone())
                .with_clock(Box::new(clock.clone()))
                .with_connectors(2)
                .with_max_tx_cnt(4),
        );
        Harness {
            cp,
            net,
            clock,
            fs,
            replies: Vec::new(),
            errors: Vec::new(),
            next_cs_id: 0,
        }
    }

    pub fn connect(&mut self) {
        self.net.borrow_mut().connect();
        self.cp.step();
    }

    pub fn disconnect(&mut self) {
        self.net.borrow_mut().disconnect();
        self.cp.step();
    }

    /// One charge point step, 100 ms later.
    pub fn step(&mut self) {
        self.clock.advance_ms(100);
        self.cp.step();
    }

    pub fn advance(&mut self, ms: u64) {
        self.clock.advance_ms(ms);
        self.cp.step();
    }

    /// Everything sent since the last drain, split into calls and
    /// replies.
    pub fn drain_sent(&mut self) -> Vec<SentCall> {
        let texts = self.net.borrow_mut().take_sent();
        let mut calls = Vec::new();
        for text in texts {
            let Ok(arr) = serde_json::from_str::<Vec<Value>>(&text) else {
                panic!("charge point sent invalid JSON: {text}");
            };
            match arr[0].as_u64() {
                Some(2) => calls.push(SentCall {
                    message_id: arr[1].as_str().unwrap_or_default().to_string(),
                    action: arr[2].as_str().unwrap_or_default().to_string(),
                    payload: arr.get(3).cloned().unwrap_or(Value::Null),
                }),
                Some(3) => self.replies.push((
                    arr[1].as_str().unwrap_or_default().to_string(),
                    arr.get(2).cloned().unwrap_or(Value::Null),
                )),
                Some(4) => self.errors.push((
                    arr[1].as_str().unwrap_or_default().to_string(),
                    arr[2].as_str().unwrap_or_default().to_string(),
                    arr.get(3).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                )),
                other => panic!("unexpected message type {other:?} in {text}"),
            }
        }
        calls
    }

    /// Reply to an outbound call.
    pub fn reply(&mut self, call: &SentCall, payload: Value) {
        let frame = json!([3, call.message_id, payload]);
        self.net.borrow_mut().push_text(frame.to_string());
        self.cp.step();
    }

    pub fn reply_error(&mut self, call: &SentCall, code: &str, description: &str) {
        let frame = json!([4, call.message_id, code, description, {}]);
        self.net.borrow_mut().push_text(frame.to_string());
        self.cp.step();
    }

    /// Step until the charge point sends calls, auto-acknowledging the
    /// pure notifications in `acks`, and return everything seen (acked
    /// included), in send order. Stops after a few quiet steps.
    pub fn pump(&mut self, acks: &[&str]) -> Vec<SentCall> {
        let mut seen = Vec::new();
        let mut quiet = 0;
        while quiet < 4 {
            self.step();
            let batch = self.drain_sent();
            if batch.is_empty() {
                quiet += 1;
                continue;
            }
            quiet = 0;
            for call in batch {
                if acks.contains(&call.action.as_str()) {
                    self.reply(&call, json!({}));
                }
                seen.push(call);
            }
        }
        seen
    }

    /// Step until a call with `action` goes out; panics after `max_steps`.
    pub fn expect_call(&mut self, action: &str, max_steps: usize) -> SentCall {
        for _ in 0..max_steps {
            self.step();
            for call in self.drain_sent() {
                if call.action == action {
                    return call;
                }
                // Unrelated notifications are acknowledged so the queue
                // keeps moving.
                self.reply(&call, json!({}));
            }
        }
        panic!("no {action} within {max_steps} steps");
    }

    /// Bring the charge point through the boot handshake.
    pub fn boot_accept(&mut self) {
        let boot = self.expect_call("BootNotification", 50);
        assert_eq!(boot.payload["chargePointVendor"], "VendorX");
        let now = to_iso_8601(self.clock.now());
        self.reply(
            &boot,
            json!({ "status": "Accepted", "currentTime": now, "interval": 3600 }),
        );
        // Initial status round.
        self.pump(&["StatusNotification"]);
    }

    /// Push a CS-initiated call and return its message id.
    pub fn push_cs_call(&mut self, action: &str, payload: Value) -> String {
        self.next_cs_id += 1;
        let id = format!("cs-{}", self.next_cs_id);
        let frame = json!([2, id, action, payload]);
        self.net.borrow_mut().push_text(frame.to_string());
        self.cp.step();
        id
    }

    /// The reply to a CS-initiated call, if it went out already.
    pub fn reply_for(&mut self, id: &str) -> Option<Value> {
        self.drain_sent();
        self.replies
            .iter()
            .find(|(reply_id, _)| reply_id == id)
            .map(|(_, payload)| payload.clone())
    }

    pub fn error_for(&mut self, id: &str) -> Option<(String, String)> {
        self.drain_sent();
        self.errors
            .iter()
            .find(|(error_id, _, _)| error_id == id)
            .map(|(_, code, description)| (code.clone(), description.clone()))
    }
}
