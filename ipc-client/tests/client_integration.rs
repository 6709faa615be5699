//! End-to-end tests driving a real `ipc_gateway::Gateway` and real
//! `ipc_client::Client`s over a scratch Unix socket (spec §8 end-to-end
//! scenarios).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use ipc_client::{Client, ClientConfig};
use ipc_gateway::{Gateway, GatewayConfig};

fn scratch_socket_path() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("ipc-client-test.sock");
    (dir, path)
}

async fn spawn_gateway(socket_path: &std::path::Path) -> Arc<Gateway> {
    let gateway = Arc::new(Gateway::new(GatewayConfig::new(socket_path)));
    let serve_gateway = gateway.clone();
    tokio::spawn(async move {
        let _ = serve_gateway.serve().await;
    });
    // Give the listener a moment to bind before any client dials it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    gateway
}

#[tokio::test]
async fn echo_scenario_round_trips_a_call() {
    let (_dir, socket_path) = scratch_socket_path();
    spawn_gateway(&socket_path).await;

    let echo = Client::builder(ClientConfig::new("echo-service", &socket_path))
        .on_call("echo", |params: serde_json::Value, _ctx| async move { Ok(params) })
        .connect()
        .await
        .expect("echo service connects");

    let caller = Client::builder(ClientConfig::new("caller", &socket_path))
        .connect()
        .await
        .expect("caller connects");

    let result = caller
        .call("echo-service", "echo", json!({"hello": "world"}))
        .await
        .expect("call succeeds");
    assert_eq!(result, json!({"hello": "world"}));

    caller.shutdown().await;
    echo.shutdown().await;
}

#[tokio::test]
async fn direct_call_context_records_caller_and_callee_at_depth_two() {
    let (_dir, socket_path) = scratch_socket_path();
    spawn_gateway(&socket_path).await;

    let leaf = Client::builder(ClientConfig::new("leaf", &socket_path))
        .on_call("depth", |_params: serde_json::Value, ctx: ipc_core::IpcContext| async move {
            Ok(json!({"root": ctx.root, "chain": ctx.chain, "depth": ctx.depth}))
        })
        .connect()
        .await
        .expect("leaf connects");

    let caller = Client::builder(ClientConfig::new("caller", &socket_path))
        .connect()
        .await
        .expect("caller connects");

    let direct = caller.call("leaf", "depth", json!(null)).await.expect("direct call");
    assert_eq!(direct["chain"], json!(["caller", "leaf"]));
    assert_eq!(direct["depth"], json!(2));

    caller.shutdown().await;
    leaf.shutdown().await;
}

#[tokio::test]
async fn nested_call_extends_chain_and_depth_through_each_hop() {
    let (_dir, socket_path) = scratch_socket_path();
    spawn_gateway(&socket_path).await;

    let leaf = Client::builder(ClientConfig::new("leaf", &socket_path))
        .on_call("depth", |_params: serde_json::Value, ctx: ipc_core::IpcContext| async move {
            Ok(json!({"root": ctx.root, "chain": ctx.chain, "depth": ctx.depth}))
        })
        .connect()
        .await
        .expect("leaf connects");

    // `middle`'s handler needs to call back out through its own Client, but
    // that Client only exists once `connect()` returns, after the handler
    // closure is already built. A cell filled immediately after connecting
    // breaks the cycle (the same pattern `demos/chain-service` uses).
    let middle_client: Arc<std::sync::OnceLock<Arc<Client>>> = Arc::new(std::sync::OnceLock::new());
    let middle_client_for_handler = middle_client.clone();
    let middle = Client::builder(ClientConfig::new("middle", &socket_path))
        .on_call("relay", move |params: serde_json::Value, _ctx: ipc_core::IpcContext| {
            let client = middle_client_for_handler
                .get()
                .expect("middle client set before handlers can be invoked")
                .clone();
            // `_ctx` is pinned as the task-local current context for the
            // duration of this handler, so this nested call inherits it
            // without needing to thread it through explicitly.
            async move { client.call("leaf", "depth", params).await }
        })
        .connect()
        .await
        .expect("middle connects");
    middle_client.set(middle.clone()).ok();

    let caller = Client::builder(ClientConfig::new("caller", &socket_path))
        .connect()
        .await
        .expect("caller connects");

    let relayed = caller.call("middle", "relay", json!(null)).await.expect("relay call");
    assert_eq!(relayed["chain"], json!(["caller", "middle", "leaf"]));
    assert_eq!(relayed["depth"], json!(3));

    middle.shutdown().await;
    leaf.shutdown().await;
    caller.shutdown().await;
}

#[tokio::test]
async fn call_to_unregistered_service_surfaces_service_not_found() {
    let (_dir, socket_path) = scratch_socket_path();
    spawn_gateway(&socket_path).await;

    let caller = Client::builder(ClientConfig::new("caller", &socket_path))
        .connect()
        .await
        .expect("caller connects");

    let err = caller
        .call("ghost-service", "whatever", json!(null))
        .await
        .expect_err("unregistered target should fail");
    assert_eq!(err.code(), ipc_core::ErrorCode::ServiceNotFound);

    caller.shutdown().await;
}

#[tokio::test]
async fn call_to_unknown_method_surfaces_method_not_found_and_does_not_retry() {
    let (_dir, socket_path) = scratch_socket_path();
    spawn_gateway(&socket_path).await;

    let callee = Client::builder(ClientConfig::new("callee", &socket_path))
        .on_call("known", |params: serde_json::Value, _ctx: ipc_core::IpcContext| async move { Ok(params) })
        .connect()
        .await
        .expect("callee connects");

    let caller = Client::builder(ClientConfig::new("caller", &socket_path))
        .connect()
        .await
        .expect("caller connects");

    let err = caller
        .call_with_retry("callee", "unknown", json!(null), 5)
        .await
        .expect_err("unknown method should fail even with retries available");
    assert_eq!(err.code(), ipc_core::ErrorCode::MethodNotFound);

    callee.shutdown().await;
    caller.shutdown().await;
}

#[tokio::test]
async fn pooled_client_registers_every_member_and_serves_calls() {
    let (_dir, socket_path) = scratch_socket_path();
    let gateway = spawn_gateway(&socket_path).await;

    let mut config = ClientConfig::new("pooled-echo", &socket_path);
    config.pool_size = 3;
    let pooled = Client::builder(config)
        .on_call("echo", |params: serde_json::Value, _ctx: ipc_core::IpcContext| async move { Ok(params) })
        .connect()
        .await
        .expect("pooled service connects");

    // All three registrations should resolve to one ServiceEntry with two
    // pool members alongside the primary.
    let snapshot = gateway.registry().snapshot().await;
    let entry = snapshot
        .iter()
        .find(|s| s.service_name == "pooled-echo")
        .expect("pooled-echo is registered");
    assert_eq!(entry.pool_size, 3);

    let caller = Client::builder(ClientConfig::new("caller", &socket_path))
        .connect()
        .await
        .expect("caller connects");

    for i in 0..6 {
        let result = caller
            .call("pooled-echo", "echo", json!({"i": i}))
            .await
            .expect("pooled call succeeds");
        assert_eq!(result, json!({"i": i}));
    }

    caller.shutdown().await;
    pooled.shutdown().await;
}

#[tokio::test]
async fn call_all_settled_collects_both_successes_and_failures() {
    let (_dir, socket_path) = scratch_socket_path();
    spawn_gateway(&socket_path).await;

    let good = Client::builder(ClientConfig::new("good", &socket_path))
        .on_call("ping", |_params: serde_json::Value, _ctx: ipc_core::IpcContext| async move { Ok(json!("pong")) })
        .connect()
        .await
        .expect("good connects");

    let caller = Client::builder(ClientConfig::new("caller", &socket_path))
        .connect()
        .await
        .expect("caller connects");

    let outcomes = caller.call_all_settled(&["good", "missing"], "ping", json!(null)).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].is_err());

    good.shutdown().await;
    caller.shutdown().await;
}
