//! Client-side half of the in-host IPC fabric: a pooled connection to the
//! Gateway, outgoing call helpers, and dispatch of incoming `CALL`s to
//! handlers registered through [`client::ClientBuilder`].

pub mod client;
pub mod config;
pub mod context_scope;
pub mod events;
pub mod pending;
pub mod pool;
pub mod transport;

pub use client::{Client, ClientBuilder, Handler};
pub use config::ClientConfig;
pub use events::{EventBus, LifecycleEvent, LogLevel};
