use std::path::PathBuf;
use std::time::Duration;

use ipc_core::CodecKind;

/// Client configuration (spec §4.4a). Constructible directly or
/// deserialised via `serde` from a config file alongside environment
/// overrides, the way `GatewayConfig` is on the Gateway side.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClientConfig {
    pub service_name: String,
    pub socket_path: PathBuf,
    pub codec: CodecKind,
    pub pool_size: usize,
    pub auto_reconnect: bool,
    #[serde(with = "humantime_duration")]
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    #[serde(with = "humantime_duration")]
    pub health_check_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub call_timeout: Duration,
    pub max_call_depth: u32,
}

impl ClientConfig {
    pub fn new(service_name: impl Into<String>, socket_path: impl Into<PathBuf>) -> Self {
        ClientConfig {
            service_name: service_name.into(),
            socket_path: socket_path.into(),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        ClientConfig {
            service_name: String::new(),
            socket_path: PathBuf::new(),
            codec: CodecKind::Json,
            pool_size: 1,
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            health_check_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            max_call_depth: 100,
        }
    }
}

/// `Duration` doesn't implement `serde::{Serialize, Deserialize}` in the
/// human-readable shape a config file wants (seconds, not a `{secs, nanos}`
/// struct); this mirrors the field-level `#[serde(with = ...)]` module
/// pattern rather than pulling in a duration-specific serde crate for three
/// fields.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
