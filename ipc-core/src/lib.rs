//! Core framing, message, and context types shared by the Gateway and
//! Client halves of the in-host IPC fabric. This crate has no transport or
//! concurrency concerns of its own — it only defines the wire shapes and the
//! pure functions ([`context`], [`framing`], [`codec`]) both sides use to
//! build and consume them.

pub mod codec;
pub mod context;
pub mod error;
pub mod framing;
pub mod message;

pub use codec::CodecKind;
pub use context::IpcContext;
pub use error::{ErrorCode, IpcError, RemoteError, Result};
pub use message::{Message, Register, ResponseStatus};
