//! Outstanding-CALL tracking (spec §3 `PendingRequest`, §5 "Pending-map
//! discipline"). Complete-once is modeled directly with a
//! `tokio::sync::oneshot::Sender` consumed by value: a response and its
//! timeout racing to complete the same entry cannot both win, because
//! removing the entry from the map is the only way either side gets hold of
//! the sender.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{oneshot, Mutex};

use ipc_core::{ErrorCode, IpcError, RemoteError, Result};

pub type CallOutcome = std::result::Result<serde_json::Value, RemoteError>;

struct Entry {
    resolver: oneshot::Sender<CallOutcome>,
    created_at: i64,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

/// The map from request id to pending entry, owned by the Client. At most
/// one entry per request id; an entry is removed exactly once, by whichever
/// of response-arrival, timeout, or teardown gets there first.
#[derive(Default)]
pub struct PendingMap {
    entries: Mutex<HashMap<String, Entry>>,
}

impl PendingMap {
    pub fn new() -> Self {
        PendingMap::default()
    }

    /// Inserts a new pending entry and returns the receiver half the caller
    /// awaits.
    pub async fn insert(&self, request_id: String) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().await;
        entries.insert(
            request_id,
            Entry {
                resolver: tx,
                created_at: now_millis(),
            },
        );
        rx
    }

    /// Completes the entry for `request_id` with `outcome`, if still present.
    /// Used both by RESPONSE-arrival and by timeout firing; whichever calls
    /// this first wins, the other finds the entry already gone.
    pub async fn complete(&self, request_id: &str, outcome: CallOutcome) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(request_id) {
            Some(entry) => entry.resolver.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Fails every outstanding entry with `code`/`message` (spec §4.4
    /// "Disconnect"). Used when the connection drops or the client shuts
    /// down.
    pub async fn fail_all(&self, code: ErrorCode, message: &str) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            let _ = entry.resolver.send(Err(RemoteError::new(code, message)));
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Awaits `rx`, translating a dropped sender (the entry was removed without
/// completing it — shouldn't normally happen, but teardown paths should
/// still surface something sane) into `CONNECTION_LOST`.
pub async fn await_outcome(rx: oneshot::Receiver<CallOutcome>) -> Result<serde_json::Value> {
    match rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(remote)) => Err(IpcError::Remote(remote)),
        Err(_) => Err(IpcError::Remote(RemoteError::new(
            ErrorCode::ConnectionLost,
            "pending request dropped without a response",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_complete_resolves_receiver() {
        let map = PendingMap::new();
        let rx = map.insert("req-1".into()).await;
        assert!(map.complete("req-1", Ok(serde_json::json!({"v": 1}))).await);
        let outcome = await_outcome(rx).await.unwrap();
        assert_eq!(outcome, serde_json::json!({"v": 1}));
    }

    #[tokio::test]
    async fn completing_twice_only_the_first_wins() {
        let map = PendingMap::new();
        let _rx = map.insert("req-1".into()).await;
        assert!(map.complete("req-1", Ok(serde_json::json!(1))).await);
        // Second completion attempt finds nothing to complete.
        assert!(!map.complete("req-1", Ok(serde_json::json!(2))).await);
    }

    #[tokio::test]
    async fn fail_all_resolves_every_entry_as_an_error() {
        let map = PendingMap::new();
        let rx_a = map.insert("a".into()).await;
        let rx_b = map.insert("b".into()).await;
        map.fail_all(ErrorCode::ConnectionLost, "socket closed").await;
        assert_eq!(map.len().await, 0);
        assert!(await_outcome(rx_a).await.is_err());
        assert!(await_outcome(rx_b).await.is_err());
    }

    #[tokio::test]
    async fn unknown_request_id_completion_is_a_noop() {
        let map = PendingMap::new();
        assert!(!map.complete("ghost", Ok(serde_json::json!(1))).await);
    }
}
