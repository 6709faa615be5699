use std::path::PathBuf;

use ipc_core::CodecKind;

/// Gateway configuration. Constructible directly, from a parsed CLI (see
/// `main.rs`), or deserialised from a config file via `serde`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GatewayConfig {
    /// Unix domain socket path the Gateway listens on. A stale file at this
    /// path is unlinked before binding.
    pub socket_path: PathBuf,

    /// Calls whose context `depth` exceeds this cap are rejected with
    /// `MAX_DEPTH_EXCEEDED` instead of being routed.
    pub max_call_depth: u32,

    /// Wire codec used to decode inbound frames and encode outbound ones.
    /// Must match what every connecting Client is configured with.
    pub codec: CodecKind,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            socket_path: PathBuf::from("/tmp/ipc-gateway.sock"),
            max_call_depth: 100,
            codec: CodecKind::Json,
        }
    }
}

impl GatewayConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        GatewayConfig {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }
}
