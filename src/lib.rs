//! # OCPP 1.6-J charge point core
//!
//! An embeddable client-side implementation of the Open Charge Point
//! Protocol 1.6-J: it speaks JSON-RPC over a WebSocket to a Central
//! System and drives the charge session lifecycle, smart charging
//! limits, metering, authorization and firmware/diagnostics workflows of
//! an EVSE controller.
//!
//! ## Architecture
//!
//! - **support**: time sources and ISO-8601 handling
//! - **storage**: the flat-file persistence the core checkpoints into
//! - **config**: the OCPP configuration registry
//! - **rpc**: OCPP-J framing and the call engine (queue, retry,
//!   correlation, ordered replies)
//! - **operations**: the per-action message dictionary, both directions
//! - **domain**: connectors, transactions, metering, smart charging,
//!   reservations, authorization, boot/heartbeat/firmware/diagnostics
//! - **transport**: the non-blocking WebSocket seam (tokio-tungstenite
//!   adapter included)
//! - **chargepoint**: the facade the host application drives with
//!   `step()`
//!
//! The whole core is single-threaded cooperative: the host calls
//! [`ChargePoint::step`] in its loop, all callbacks fire inside it, and
//! waiting for the Central System is just a queue entry surviving into
//! the next step.

pub mod chargepoint;
pub mod config;
pub mod domain;
pub mod operations;
pub mod rpc;
pub mod storage;
pub mod support;
pub mod transport;

// The host-facing surface at the crate root.
pub use chargepoint::{ChargePoint, ChargePointOptions};
pub use domain::boot::BootCredentials;
pub use domain::connector::{TxEnableState, TxNotification, TxTrigger, UnlockStatus};
pub use domain::smart_charging::ChargeRate;
pub use operations::types::{ChargePointStatus, Reason};
pub use operations::CallListener;
pub use storage::{FilesystemOpt, MemoryFilesystem, SharedFilesystem, StdFilesystem};
pub use support::clock::{Clock, SimClock, SystemClock};
pub use transport::{LoopbackTransport, Transport, TransportEvent};
