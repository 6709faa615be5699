use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ipc_core::{CodecKind, IpcContext, Message, Register};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// A bare-bones stand-in for a Client connection, used only to drive the
/// Gateway's wire protocol directly in these tests (the real pooling,
/// pending-request, and context-propagation behavior lives in `ipc-client`
/// and is exercised by that crate's own test suite).
pub struct TestPeer {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
    codec: CodecKind,
}

impl TestPeer {
    pub async fn connect(socket_path: &std::path::Path) -> Self {
        let stream = UnixStream::connect(socket_path)
            .await
            .expect("connect to gateway socket");
        TestPeer {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
            codec: CodecKind::Json,
        }
    }

    pub async fn send(&mut self, message: &Message) {
        let bytes = self.codec.encode(message).unwrap();
        self.framed.send(bytes.into()).await.unwrap();
    }

    pub async fn recv(&mut self) -> Message {
        let bytes = tokio::time::timeout(Duration::from_secs(2), self.framed.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .unwrap();
        self.codec.decode(&bytes).unwrap()
    }

    pub async fn try_recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        match tokio::time::timeout(timeout, self.framed.next()).await {
            Ok(Some(Ok(bytes))) => Some(self.codec.decode(&bytes).unwrap()),
            _ => None,
        }
    }

    pub async fn register(&mut self, service_name: &str, methods: &[&str]) {
        self.send(&Message::Register(Register {
            service_name: service_name.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            version: None,
            metadata: None,
        }))
        .await;
        assert!(matches!(self.recv().await, Message::RegisterAck));
    }

    pub async fn register_pooled(&mut self, service_name: &str, pool_index: i64) {
        let mut metadata = HashMap::new();
        metadata.insert("poolIndex".to_string(), serde_json::json!(pool_index));
        self.send(&Message::Register(Register {
            service_name: service_name.to_string(),
            methods: vec![],
            version: None,
            metadata: Some(metadata),
        }))
        .await;
        assert!(matches!(self.recv().await, Message::RegisterAck));
    }

    pub async fn call(&mut self, id: &str, from: &str, to: &str, method: &str, params: serde_json::Value) {
        self.send(&Message::Call {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            method: method.to_string(),
            params,
            context: IpcContext::create(from, 5_000),
        })
        .await;
    }
}

pub fn scratch_socket_path() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("gateway.sock");
    (dir, path)
}
