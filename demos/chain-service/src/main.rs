//! A three-hop chain (`front` → `middle` → `back`) exercising nested calls
//! and distributed context propagation (spec §8 scenario 2): `front` issues
//! one call into `middle`, whose handler calls into `back` without ever
//! touching the causal context directly — it's inherited from the task-local
//! scope the incoming CALL dispatch already pinned.

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use ipc_client::{Client, ClientConfig};
use ipc_core::CodecKind;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Role {
    Front,
    Middle,
    Back,
}

#[derive(Parser, Debug)]
#[command(name = "chain-service", version, about)]
struct Cli {
    /// Unix domain socket path of the Gateway to register with.
    #[arg(long, default_value = "/tmp/ipc-gateway.sock")]
    socket_path: PathBuf,

    /// Which hop of the chain this process plays.
    #[arg(long, value_enum)]
    role: Role,

    /// Wire codec: "json" or "msgpack".
    #[arg(long, default_value = "json")]
    codec: String,
}

impl Cli {
    fn client_config(&self, service_name: &str) -> Result<ClientConfig, String> {
        let codec = match self.codec.as_str() {
            "json" => CodecKind::Json,
            "msgpack" => CodecKind::MsgPack,
            other => return Err(format!("unknown codec \"{other}\" (expected json or msgpack)")),
        };
        let mut config = ClientConfig::new(service_name, self.socket_path.clone());
        config.codec = codec;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.role {
        Role::Back => run_back(&cli).await,
        Role::Middle => run_middle(&cli).await,
        Role::Front => run_front(&cli).await,
    }
}

async fn run_back(cli: &Cli) {
    let config = config_or_exit(cli, "back");
    let client = connect_or_exit(config, |builder| {
        builder.on_call("leaf", |params: serde_json::Value, ctx: ipc_core::IpcContext| async move {
            Ok(serde_json::json!({
                "echoed": params,
                "root": ctx.root,
                "chain": ctx.chain,
                "depth": ctx.depth,
            }))
        })
    })
    .await;

    tracing::info!("back registered, waiting for calls");
    let _ = tokio::signal::ctrl_c().await;
    client.shutdown().await;
}

async fn run_middle(cli: &Cli) {
    let config = config_or_exit(cli, "middle");
    let client = connect_or_exit(config, |builder| {
        builder.on_call("relay", |params: serde_json::Value, _ctx: ipc_core::IpcContext| {
            let client = CURRENT_MIDDLE_CLIENT
                .get()
                .expect("middle client set before handlers can be invoked")
                .clone();
            async move { client.call("back", "leaf", params).await }
        })
    })
    .await;

    CURRENT_MIDDLE_CLIENT.set(client.clone()).ok();

    tracing::info!("middle registered, waiting for calls");
    let _ = tokio::signal::ctrl_c().await;
    client.shutdown().await;
}

async fn run_front(cli: &Cli) {
    let config = config_or_exit(cli, "front");
    let client = connect_or_exit(config, |builder| builder).await;

    let result = client
        .call("middle", "relay", serde_json::json!({"greeting": "hello from front"}))
        .await;
    match result {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap()),
        Err(err) => {
            eprintln!("chain call failed: {err}");
            process::exit(1);
        }
    }

    client.shutdown().await;
}

fn config_or_exit(cli: &Cli, service_name: &str) -> ClientConfig {
    match cli.client_config(service_name) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(2);
        }
    }
}

async fn connect_or_exit(
    config: ClientConfig,
    build: impl FnOnce(ipc_client::ClientBuilder) -> ipc_client::ClientBuilder,
) -> std::sync::Arc<Client> {
    match build(Client::builder(config)).connect().await {
        Ok(client) => client,
        Err(err) => {
            eprintln!("failed to connect to gateway: {err}");
            process::exit(1);
        }
    }
}

// `middle`'s "relay" handler needs to issue an outgoing call through the
// same Client it is registered on, but that Client only exists once
// `connect()` returns — after the handler closure has already been built.
// A once-cell filled immediately after connecting breaks the cycle without
// making the Client hold a reference to itself.
static CURRENT_MIDDLE_CLIENT: std::sync::OnceLock<std::sync::Arc<Client>> = std::sync::OnceLock::new();
