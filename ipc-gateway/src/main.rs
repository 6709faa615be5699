use std::path::PathBuf;
use std::process;

use clap::Parser;
use ipc_core::CodecKind;
use ipc_gateway::{Gateway, GatewayConfig};
use tracing_subscriber::EnvFilter;

/// The in-host IPC fabric's router process.
#[derive(Parser, Debug)]
#[command(name = "ipc-gatewayd", version, about)]
struct Cli {
    /// Unix domain socket path to listen on.
    #[arg(long, default_value = "/tmp/ipc-gateway.sock")]
    socket_path: PathBuf,

    /// Maximum call-chain depth before a CALL is rejected with MAX_DEPTH_EXCEEDED.
    #[arg(long, default_value_t = 100)]
    max_call_depth: u32,

    /// Wire codec: "json" or "msgpack".
    #[arg(long, default_value = "json")]
    codec: String,
}

impl Cli {
    fn gateway_config(&self) -> Result<GatewayConfig, String> {
        let codec = match self.codec.as_str() {
            "json" => CodecKind::Json,
            "msgpack" => CodecKind::MsgPack,
            other => return Err(format!("unknown codec \"{other}\" (expected json or msgpack)")),
        };
        Ok(GatewayConfig {
            socket_path: self.socket_path.clone(),
            max_call_depth: self.max_call_depth,
            codec,
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match cli.gateway_config() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(2);
        }
    };

    let gateway = Gateway::new(config);
    if let Err(err) = gateway.serve().await {
        eprintln!("gateway failed: {err}");
        process::exit(1);
    }
}
