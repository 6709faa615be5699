//! The central router process for the in-host IPC fabric. A pure message
//! router: it owns the connection registry and forwards CALL/RESPONSE
//! frames between registered services. It never interprets payloads.

pub mod config;
pub mod connection;
pub mod registry;
pub mod router;

pub use config::GatewayConfig;
pub use registry::Registry;
pub use router::Gateway;
