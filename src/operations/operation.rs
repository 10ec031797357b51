//! Outbound call descriptors.
//!
//! Every charge-point-initiated OCPP operation is a variant of
//! [`Operation`]. The variant carries only correlation data (connector,
//! transaction number, snapshot payload fields); the request payload is
//! built when the call reaches the head of the RPC queue, and the response
//! is applied to the model by the dispatch code in this crate's per
//! operation modules.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::types::{ChargePointStatus, MeterValue};
use crate::domain::diagnostics::DiagnosticsStatus;
use crate::domain::firmware::FirmwareStatus;

/// How long a queued call may wait for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Never times out (e.g. `BootNotification`, which retries forever).
    None,
    /// Fires `ms` after queue insertion, connected or not.
    Fixed(u64),
    /// Accumulates only while the transport is connected and the boot
    /// handshake is through; a call queued offline keeps indefinitely.
    OfflineSensitive(u64),
}

/// Host callbacks attached to an outbound call.
#[derive(Default)]
pub struct CallListener {
    pub on_conf: Option<Box<dyn FnMut(&Value)>>,
    pub on_error: Option<Box<dyn FnMut(&str, &str, &Value)>>,
    pub on_timeout: Option<Box<dyn FnMut()>>,
    pub on_abort: Option<Box<dyn FnMut()>>,
}

impl CallListener {
    pub fn on_conf(mut self, cb: impl FnMut(&Value) + 'static) -> Self {
        self.on_conf = Some(Box::new(cb));
        self
    }

    pub fn on_error(mut self, cb: impl FnMut(&str, &str, &Value) + 'static) -> Self {
        self.on_error = Some(Box::new(cb));
        self
    }

    pub fn on_timeout(mut self, cb: impl FnMut() + 'static) -> Self {
        self.on_timeout = Some(Box::new(cb));
        self
    }

    pub fn on_abort(mut self, cb: impl FnMut() + 'static) -> Self {
        self.on_abort = Some(Box::new(cb));
        self
    }
}

impl std::fmt::Debug for CallListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallListener")
            .field("on_conf", &self.on_conf.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A charge-point-initiated OCPP 1.6 operation.
#[derive(Debug, Clone)]
pub enum Operation {
    BootNotification,
    Heartbeat,
    Authorize {
        connector_id: u32,
        id_tag: String,
    },
    StartTransaction {
        connector_id: u32,
        tx_nr: u32,
    },
    StopTransaction {
        connector_id: u32,
        tx_nr: u32,
    },
    MeterValues {
        connector_id: u32,
        /// Bind the payload to this transaction; the request is dropped if
        /// the transaction has meanwhile concluded or aborted.
        tx_nr: Option<u32>,
        meter_values: Vec<MeterValue>,
    },
    StatusNotification {
        connector_id: u32,
        status: ChargePointStatus,
        error_code: String,
        timestamp: DateTime<Utc>,
    },
    DiagnosticsStatusNotification {
        status: DiagnosticsStatus,
    },
    FirmwareStatusNotification {
        status: FirmwareStatus,
    },
    DataTransfer {
        vendor_id: String,
        message_id: Option<String>,
        data: Option<String>,
    },
}

impl Operation {
    /// Action name on the wire.
    pub fn action(&self) -> &'static str {
        match self {
            Self::BootNotification => "BootNotification",
            Self::Heartbeat => "Heartbeat",
            Self::Authorize { .. } => "Authorize",
            Self::StartTransaction { .. } => "StartTransaction",
            Self::StopTransaction { .. } => "StopTransaction",
            Self::MeterValues { .. } => "MeterValues",
            Self::StatusNotification { .. } => "StatusNotification",
            Self::DiagnosticsStatusNotification { .. } => "DiagnosticsStatusNotification",
            Self::FirmwareStatusNotification { .. } => "FirmwareStatusNotification",
            Self::DataTransfer { .. } => "DataTransfer",
        }
    }

    /// Transaction-related calls must survive offline stretches; the rest
    /// get a fixed response window.
    pub fn default_timeout(&self, authorize_timeout_s: i32, tx_timeout_s: i32) -> TimeoutPolicy {
        match self {
            Self::BootNotification => TimeoutPolicy::None,
            Self::Authorize { .. } => TimeoutPolicy::Fixed(authorize_timeout_s.max(1) as u64 * 1000),
            Self::StartTransaction { .. } | Self::StopTransaction { .. } | Self::MeterValues { .. } => {
                TimeoutPolicy::OfflineSensitive(tx_timeout_s.max(1) as u64 * 1000)
            }
            _ => TimeoutPolicy::Fixed(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

/// Response window for calls with no special policy.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 40_000;

/// One entry of the model's outbox, waiting to be handed to the RPC
/// engine.
#[derive(Debug)]
pub struct Request {
    pub operation: Operation,
    pub listener: Option<CallListener>,
    /// Overrides [`Operation::default_timeout`] when set.
    pub timeout: Option<TimeoutPolicy>,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            listener: None,
            timeout: None,
        }
    }

    pub fn with_listener(mut self, listener: CallListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Calls produced by the model during a step, drained by the engine.
#[derive(Debug, Default)]
pub struct Outbox {
    requests: Vec<Request>,
}

impl Outbox {
    pub fn push(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn push_operation(&mut self, operation: Operation) {
        self.requests.push(Request::new(operation));
    }

    pub fn drain(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
