//! The RPC engine: outbound queue, inbound dispatcher, correlation.
//!
//! Outbound calls form a single FIFO; only the head is ever on the wire,
//! which is what gives `StartTransaction` → `MeterValues` →
//! `StopTransaction` their ordering for free. The head is retransmitted
//! with exponential backoff until its response, timeout or abort.
//!
//! Inbound calls are answered strictly in arrival order: every call gets
//! a reply slot at parse time, and slots drain front-first once ready.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config;
use crate::domain::Model;
use crate::operations::{
    self, BuildOutcome, CallListener, DeferredReply, HandleOutcome, Operation, Request,
    TimeoutPolicy,
};
use crate::transport::{Transport, TransportEvent};

use super::frame::{CallError, ErrorCode, Frame, FrameError};

/// First retransmission delay of the queue head.
pub const RETRY_INTERVAL_MS: u64 = 5_000;
/// Retransmission backoff ceiling.
pub const RETRY_INTERVAL_MAX_MS: u64 = 60_000;
/// How long a deferred inbound reply may stay pending.
const DEFERRED_REPLY_TIMEOUT_MS: u64 = 20_000;

struct PendingCall {
    message_id: String,
    operation: Operation,
    listener: Option<CallListener>,
    timeout: TimeoutPolicy,
    /// Accumulated against the timeout policy.
    elapsed_ms: u64,
    /// Serialized frame, built when the call first reaches the head.
    serialized: Option<String>,
    /// Countdown until the next transmission attempt.
    retry_in_ms: u64,
    backoff_ms: u64,
}

enum ReplyState {
    Ready(String),
    Deferred { reply: DeferredReply, age_ms: u64 },
}

struct InboundReply {
    unique_id: String,
    state: ReplyState,
}

pub struct RpcEngine {
    outbound: VecDeque<PendingCall>,
    inbound: VecDeque<InboundReply>,
    last_step_ms: Option<u64>,
}

impl RpcEngine {
    pub fn new() -> Self {
        Self {
            outbound: VecDeque::new(),
            inbound: VecDeque::new(),
            last_step_ms: None,
        }
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Nothing queued in either direction.
    pub fn is_idle(&self) -> bool {
        self.outbound.is_empty() && self.inbound.is_empty()
    }

    // ── Submission ─────────────────────────────────────────

    /// Enqueue an outbound call. The message id is minted here and stays
    /// unique for the process lifetime.
    pub fn submit(&mut self, model: &Model, request: Request) -> String {
        let message_id = uuid::Uuid::new_v4().to_string();
        let timeout = request.timeout.unwrap_or_else(|| {
            let authorize_timeout_s = model
                .config
                .int(config::AUTHORIZATION_TIMEOUT)
                .unwrap_or(20);
            let tx_timeout_s = model
                .config
                .int(config::TRANSACTION_MESSAGE_ATTEMPTS)
                .unwrap_or(3)
                .saturating_mul(
                    model
                        .config
                        .int(config::TRANSACTION_MESSAGE_RETRY_INTERVAL)
                        .unwrap_or(60),
                );
            request
                .operation
                .default_timeout(authorize_timeout_s, tx_timeout_s)
        });
        debug!(
            action = request.operation.action(),
            %message_id, "call queued"
        );
        self.outbound.push_back(PendingCall {
            message_id: message_id.clone(),
            operation: request.operation,
            listener: request.listener,
            timeout,
            elapsed_ms: 0,
            serialized: None,
            retry_in_ms: 0,
            backoff_ms: RETRY_INTERVAL_MS,
        });
        message_id
    }

    /// Drain the model's outbox into the queue.
    pub fn pump_outbox(&mut self, model: &mut Model) {
        for request in model.outbox.drain() {
            self.submit(model, request);
        }
    }

    // ── Step ───────────────────────────────────────────────

    pub fn step(&mut self, model: &mut Model, transport: &mut dyn Transport) {
        // Transport events first, so a reconnect is visible to the rest
        // of the step.
        while let Some(event) = transport.poll() {
            self.on_transport_event(model, event);
        }
        model.connected = transport.is_connected();

        let now_ms = model.time.uptime_ms();
        let delta_ms = now_ms.saturating_sub(self.last_step_ms.unwrap_or(now_ms));
        self.last_step_ms = Some(now_ms);

        self.pump_outbox(model);
        self.run_timeouts(model, delta_ms);
        self.transmit_head(model, transport, delta_ms);
        self.drain_replies(model, transport, delta_ms);
    }

    fn on_transport_event(&mut self, model: &mut Model, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("transport connected");
                model.connected = true;
                // Fresh connection: the head retransmits immediately.
                if let Some(head) = self.outbound.front_mut() {
                    head.retry_in_ms = 0;
                    head.backoff_ms = RETRY_INTERVAL_MS;
                }
            }
            TransportEvent::Disconnected => {
                info!("transport disconnected");
                model.connected = false;
            }
            TransportEvent::Text(text) => self.handle_text(model, &text),
            TransportEvent::Ping | TransportEvent::Pong => {}
            TransportEvent::Binary(_) => {
                warn!("binary frame rejected, OCPP-J is text only");
            }
            TransportEvent::Fragment => {
                warn!("fragmented frame rejected");
            }
        }
    }

    // ── Timeouts ───────────────────────────────────────────

    fn run_timeouts(&mut self, model: &mut Model, delta_ms: u64) {
        let online = model.connected && model.boot.is_accepted();
        let mut expired = Vec::new();
        for (i, call) in self.outbound.iter_mut().enumerate() {
            let limit = match call.timeout {
                TimeoutPolicy::None => continue,
                TimeoutPolicy::Fixed(ms) => {
                    call.elapsed_ms += delta_ms;
                    ms
                }
                TimeoutPolicy::OfflineSensitive(ms) => {
                    if online {
                        call.elapsed_ms += delta_ms;
                    }
                    ms
                }
            };
            if call.elapsed_ms >= limit {
                expired.push(i);
            }
        }
        // Remove back-to-front so indices stay valid.
        for i in expired.into_iter().rev() {
            if let Some(mut call) = self.outbound.remove(i) {
                if let Some(listener) = call.listener.as_mut() {
                    if let Some(cb) = listener.on_timeout.as_mut() {
                        cb();
                    }
                }
                operations::apply_timeout(model, &call.operation);
                if let Some(listener) = call.listener.as_mut() {
                    if let Some(cb) = listener.on_abort.as_mut() {
                        cb();
                    }
                }
            }
        }
    }

    // ── Transmission ───────────────────────────────────────

    fn transmit_head(
        &mut self,
        model: &mut Model,
        transport: &mut dyn Transport,
        delta_ms: u64,
    ) {
        if !transport.is_connected() {
            return;
        }
        loop {
            // Pre-boot lockout: only BootNotification may leave, wherever
            // it sits in the queue (replayed transaction reports may be
            // ahead of it after a reboot).
            let idx = if model.boot.is_accepted() {
                if self.outbound.is_empty() {
                    return;
                }
                0
            } else {
                match self
                    .outbound
                    .iter()
                    .position(|call| matches!(call.operation, Operation::BootNotification))
                {
                    Some(idx) => idx,
                    None => return,
                }
            };

            let Some(call) = self.outbound.get_mut(idx) else { return };
            call.retry_in_ms = call.retry_in_ms.saturating_sub(delta_ms);
            if call.retry_in_ms > 0 {
                return;
            }

            if call.serialized.is_none() {
                let operation = call.operation.clone();
                match operations::build_request(model, &operation) {
                    BuildOutcome::Payload(payload) => {
                        let Some(call) = self.outbound.get_mut(idx) else { return };
                        let frame = Frame::Call {
                            unique_id: call.message_id.clone(),
                            action: call.operation.action().to_string(),
                            payload,
                        };
                        call.serialized = Some(frame.serialize());
                    }
                    BuildOutcome::Skip => {
                        debug!(action = operation.action(), "call no longer applies, dropped");
                        if let Some(mut call) = self.outbound.remove(idx) {
                            if let Some(listener) = call.listener.as_mut() {
                                if let Some(cb) = listener.on_abort.as_mut() {
                                    cb();
                                }
                            }
                        }
                        continue;
                    }
                }
            }

            let Some(call) = self.outbound.get_mut(idx) else { return };
            let Some(text) = call.serialized.as_deref() else { return };
            if transport.send_text(text) {
                debug!(action = call.operation.action(), message_id = %call.message_id, "call transmitted");
            }
            // Transmitted or back-pressured: either way, try again after
            // the backoff unless a response arrives first.
            call.retry_in_ms = call.backoff_ms;
            call.backoff_ms = (call.backoff_ms * 2).min(RETRY_INTERVAL_MAX_MS);
            return;
        }
    }

    // ── Inbound ────────────────────────────────────────────

    fn handle_text(&mut self, model: &mut Model, text: &str) {
        let max_size = model
            .config
            .int(config::MAX_MESSAGE_SIZE)
            .unwrap_or(65_536)
            .max(1024) as usize;

        let frame = match Frame::parse(text, max_size) {
            Ok(frame) => frame,
            Err(FrameError::Oversized { size, limit }) => {
                warn!(size, limit, "inbound frame too large");
                if let Some(id) = Frame::recover_unique_id(text) {
                    let error = CallError::new(
                        ErrorCode::GenericError,
                        "Payload exceeds the available memory",
                    );
                    self.inbound.push_back(InboundReply {
                        unique_id: id.clone(),
                        state: ReplyState::Ready(Frame::error_response(id, &error).serialize()),
                    });
                }
                return;
            }
            Err(e) => {
                // A call whose id is recoverable still deserves an answer.
                match Frame::recover_unique_id(text) {
                    Some(id) => {
                        warn!(error = %e, unique_id = %id, "malformed frame, answering ProtocolError");
                        let error = CallError::new(ErrorCode::ProtocolError, e.to_string());
                        self.inbound.push_back(InboundReply {
                            unique_id: id.clone(),
                            state: ReplyState::Ready(
                                Frame::error_response(id, &error).serialize(),
                            ),
                        });
                    }
                    None => warn!(error = %e, "malformed frame dropped"),
                }
                return;
            }
        };

        match frame {
            Frame::Call {
                unique_id,
                action,
                payload,
            } => {
                debug!(action = %action, unique_id = %unique_id, "inbound call");
                let state = match operations::handle_call(model, &action, payload) {
                    Ok(HandleOutcome::Reply(value)) => ReplyState::Ready(
                        Frame::CallResult {
                            unique_id: unique_id.clone(),
                            payload: value,
                        }
                        .serialize(),
                    ),
                    Ok(HandleOutcome::Deferred(reply)) => {
                        ReplyState::Deferred { reply, age_ms: 0 }
                    }
                    Err(error) => ReplyState::Ready(
                        Frame::error_response(unique_id.clone(), &error).serialize(),
                    ),
                };
                self.inbound.push_back(InboundReply { unique_id, state });
            }
            Frame::CallResult { unique_id, payload } => {
                self.correlate_result(model, &unique_id, Ok(payload));
            }
            Frame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                self.correlate_result(
                    model,
                    &unique_id,
                    Err((error_code, error_description, error_details)),
                );
            }
        }
    }

    fn correlate_result(
        &mut self,
        model: &mut Model,
        unique_id: &str,
        result: Result<Value, (String, String, Value)>,
    ) {
        // Head-first scan; anything but the head matching is unusual but
        // tolerated.
        let position = self
            .outbound
            .iter()
            .position(|call| call.message_id == unique_id);
        let Some(position) = position else {
            warn!(unique_id, "result does not match any pending call, dropped");
            return;
        };
        let Some(mut call) = self.outbound.remove(position) else { return };
        match result {
            Ok(payload) => {
                operations::apply_response(model, &call.operation, &payload);
                if let Some(listener) = call.listener.as_mut() {
                    if let Some(cb) = listener.on_conf.as_mut() {
                        cb(&payload);
                    }
                }
            }
            Err((code, description, details)) => {
                operations::apply_call_error(model, &call.operation, &code, &description);
                if let Some(listener) = call.listener.as_mut() {
                    if let Some(cb) = listener.on_error.as_mut() {
                        cb(&code, &description, &details);
                    }
                    if let Some(cb) = listener.on_abort.as_mut() {
                        cb();
                    }
                }
            }
        }
    }

    // ── Ordered reply drain ────────────────────────────────

    fn drain_replies(
        &mut self,
        model: &mut Model,
        transport: &mut dyn Transport,
        delta_ms: u64,
    ) {
        // Poll deferred slots wherever they sit in the FIFO.
        for slot in self.inbound.iter_mut() {
            let resolved = match &mut slot.state {
                ReplyState::Deferred { reply, age_ms } => {
                    *age_ms += delta_ms;
                    match operations::poll_deferred(model, reply) {
                        Some(value) => Some(
                            Frame::CallResult {
                                unique_id: slot.unique_id.clone(),
                                payload: value,
                            }
                            .serialize(),
                        ),
                        None if *age_ms >= DEFERRED_REPLY_TIMEOUT_MS => {
                            let error = CallError::new(
                                ErrorCode::GenericError,
                                "Operation did not complete",
                            );
                            Some(Frame::error_response(slot.unique_id.clone(), &error).serialize())
                        }
                        None => None,
                    }
                }
                ReplyState::Ready(_) => None,
            };
            if let Some(text) = resolved {
                slot.state = ReplyState::Ready(text);
            }
        }
        // Replies leave strictly in arrival order.
        while let Some(front) = self.inbound.front() {
            let ReplyState::Ready(text) = &front.state else { break };
            if !transport.is_connected() || !transport.send_text(text) {
                break;
            }
            self.inbound.pop_front();
        }
    }
}

impl Default for RpcEngine {
    fn default() -> Self {
        Self::new()
    }
}
