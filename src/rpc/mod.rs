//! OCPP-J RPC: framing and the call engine.

pub mod engine;
pub mod frame;

pub use engine::RpcEngine;
pub use frame::{CallError, ErrorCode, Frame, FrameError};
