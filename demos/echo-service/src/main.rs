//! Registers a service called `echo` whose only method, also named `echo`,
//! returns its params unchanged. Useful as the simplest possible target for
//! exercising the fabric end to end (spec §8 scenario 1).

use std::path::PathBuf;
use std::process;

use clap::Parser;
use ipc_client::{Client, ClientConfig};
use ipc_core::CodecKind;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "echo-service", version, about)]
struct Cli {
    /// Unix domain socket path of the Gateway to register with.
    #[arg(long, default_value = "/tmp/ipc-gateway.sock")]
    socket_path: PathBuf,

    /// Service name to register under.
    #[arg(long, default_value = "echo")]
    name: String,

    /// Number of pooled connections to open for this service.
    #[arg(long, default_value_t = 1)]
    pool_size: usize,

    /// Wire codec: "json" or "msgpack".
    #[arg(long, default_value = "json")]
    codec: String,
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig, String> {
        let codec = match self.codec.as_str() {
            "json" => CodecKind::Json,
            "msgpack" => CodecKind::MsgPack,
            other => return Err(format!("unknown codec \"{other}\" (expected json or msgpack)")),
        };
        let mut config = ClientConfig::new(self.name.clone(), self.socket_path.clone());
        config.codec = codec;
        config.pool_size = self.pool_size;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match cli.client_config() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(2);
        }
    };

    let client = match Client::builder(config)
        .on_call("echo", |params: serde_json::Value, _ctx: ipc_core::IpcContext| async move { Ok(params) })
        .connect()
        .await
    {
        Ok(client) => client,
        Err(err) => {
            eprintln!("failed to connect to gateway: {err}");
            process::exit(1);
        }
    };

    tracing::info!("echo service registered, waiting for calls");
    let _ = tokio::signal::ctrl_c().await;
    client.shutdown().await;
}
