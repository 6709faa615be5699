//! The Gateway's connection registry (spec §3 `ServiceEntry`, §4.2, §9
//! "Registry identity"). Two indices are maintained together under a single
//! lock: `name → ServiceEntry` for routing, and `ConnectionId → name` so a
//! closing connection can find which service (and which slot within it) to
//! remove without a linear scan.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex};

use ipc_core::Message;

pub type ConnectionId = u64;

/// An outbound frame queued for a single connection's writer task.
pub type Outbox = mpsc::UnboundedSender<Message>;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

/// A registered service. `primary` is the connection that sent the initial
/// (non-pooled) REGISTER; `pool` holds any additional members appended by
/// subsequent pooled REGISTERs under the same name. RESPONSE frames destined
/// for this service's caller role always go to `primary`, never a pool
/// member — see spec §9's resolved "RESPONSE routing" open question.
#[derive(Debug)]
pub struct ServiceEntry {
    pub service_name: String,
    pub primary: ConnectionId,
    pub pool: Vec<ConnectionId>,
    pub methods: Vec<String>,
    pub version: Option<String>,
    pub connected_at: i64,
    pub last_heartbeat: i64,
    current_socket_index: usize,
}

impl ServiceEntry {
    fn new(service_name: String, primary: ConnectionId, methods: Vec<String>, version: Option<String>) -> Self {
        let now = now_millis();
        ServiceEntry {
            service_name,
            primary,
            pool: Vec::new(),
            methods,
            version,
            connected_at: now,
            last_heartbeat: now,
            current_socket_index: 0,
        }
    }

    /// All connections that can legitimately receive a CALL for this service,
    /// in egress order: the primary first, then pool members.
    fn egress_candidates(&self) -> Vec<ConnectionId> {
        let mut members = vec![self.primary];
        members.extend(self.pool.iter().copied());
        members
    }

    /// Picks the next egress connection via round-robin across
    /// `egress_candidates()` and advances the cursor modulo the candidate
    /// count. Removing `dead` first (on a write failure) lets the caller
    /// retry once against whatever remains.
    fn next_egress(&mut self, dead: Option<ConnectionId>) -> Option<ConnectionId> {
        if let Some(dead) = dead {
            self.pool.retain(|c| *c != dead);
        }
        let candidates = self.egress_candidates();
        if candidates.is_empty() {
            return None;
        }
        let idx = self.current_socket_index % candidates.len();
        self.current_socket_index = (self.current_socket_index + 1) % candidates.len();
        Some(candidates[idx])
    }
}

/// A lightweight public view of a `ServiceEntry`, returned by `snapshot()`
/// (spec §4.2a) so an admin surface could be built on top without taking
/// the registry lock itself.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceSnapshot {
    pub service_name: String,
    pub methods: Vec<String>,
    pub version: Option<String>,
    pub pool_size: usize,
    pub connected_at: i64,
    pub last_heartbeat: i64,
}

#[derive(Debug)]
pub enum RegisterOutcome {
    /// A new `ServiceEntry` was created; `conn` becomes its primary.
    Registered,
    /// `conn` was appended as a pool member of an existing entry.
    PoolMemberAttached,
    /// An entry already exists and the REGISTER lacked a pool index — the
    /// connection must be sent an ERROR and closed. The existing entry is
    /// untouched.
    AlreadyRegistered,
}

/// Which connection a disconnecting socket owned, and what cleanup is
/// required.
#[derive(Debug, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// This connection was a ServiceEntry's primary; the whole entry
    /// (including any pool members) was removed.
    PrimaryRemoved(String),
    /// This connection was a pool member; only it was trimmed.
    PoolMemberRemoved(String),
    /// The connection had never completed REGISTER.
    Unregistered,
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, ServiceEntry>,
    by_connection: HashMap<ConnectionId, String>,
    outboxes: HashMap<ConnectionId, Outbox>,
}

/// The Gateway's shared connection/service state, guarded by a single
/// `tokio::sync::Mutex` (spec §5: "accessed under mutual exclusion").
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `conn`'s outbox so other connections' routing can reach it.
    /// Called at accept time, before REGISTER arrives.
    pub async fn attach_outbox(&self, conn: ConnectionId, outbox: Outbox) {
        let mut inner = self.inner.lock().await;
        inner.outboxes.insert(conn, outbox);
    }

    /// Queues `message` for delivery on `conn`'s writer task. Returns `Err`
    /// if the connection has no live outbox (already closed) or the writer
    /// task's receiver has been dropped.
    pub async fn send_to(&self, conn: ConnectionId, message: Message) -> Result<(), ConnectionId> {
        let inner = self.inner.lock().await;
        match inner.outboxes.get(&conn) {
            Some(outbox) if outbox.send(message).is_ok() => Ok(()),
            _ => Err(conn),
        }
    }

    pub async fn register(
        &self,
        conn: ConnectionId,
        service_name: String,
        methods: Vec<String>,
        version: Option<String>,
        pool_index: Option<i64>,
    ) -> RegisterOutcome {
        let mut inner = self.inner.lock().await;
        match inner.by_name.get_mut(&service_name) {
            None => {
                let entry = ServiceEntry::new(service_name.clone(), conn, methods, version);
                inner.by_name.insert(service_name.clone(), entry);
                inner.by_connection.insert(conn, service_name);
                RegisterOutcome::Registered
            }
            Some(entry) => {
                if pool_index.is_none() {
                    return RegisterOutcome::AlreadyRegistered;
                }
                entry.pool.push(conn);
                inner.by_connection.insert(conn, service_name);
                RegisterOutcome::PoolMemberAttached
            }
        }
    }

    /// Picks an egress connection for a CALL to `service_name`, retrying once
    /// against the remaining pool if `dead` names a member whose write just
    /// failed (spec §4.2 routing rule 3: "the member is dropped and the
    /// lookup is retried once against remaining members").
    pub async fn select_egress(
        &self,
        service_name: &str,
        dead: Option<ConnectionId>,
    ) -> Option<ConnectionId> {
        let mut inner = self.inner.lock().await;
        let entry = inner.by_name.get_mut(service_name)?;
        entry.next_egress(dead)
    }

    /// The caller's primary connection — RESPONSE frames always target this,
    /// never a pool member.
    pub async fn primary_connection(&self, service_name: &str) -> Option<ConnectionId> {
        let inner = self.inner.lock().await;
        inner.by_name.get(service_name).map(|e| e.primary)
    }

    pub async fn contains(&self, service_name: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.by_name.contains_key(service_name)
    }

    pub async fn connected_services(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.by_name.keys().cloned().collect()
    }

    pub async fn touch_heartbeat(&self, conn: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if let Some(name) = inner.by_connection.get(&conn).cloned() {
            if let Some(entry) = inner.by_name.get_mut(&name) {
                entry.last_heartbeat = now_millis();
            }
        }
    }

    /// Removes whatever `conn` owned (primary entry or pool slot) and
    /// reports which it was, per spec §4.2 disconnect handling.
    pub async fn disconnect(&self, conn: ConnectionId) -> DisconnectOutcome {
        let mut inner = self.inner.lock().await;
        inner.outboxes.remove(&conn);
        let Some(name) = inner.by_connection.remove(&conn) else {
            return DisconnectOutcome::Unregistered;
        };
        let Some(entry) = inner.by_name.get_mut(&name) else {
            return DisconnectOutcome::Unregistered;
        };
        if entry.primary == conn {
            for member in entry.pool.drain(..) {
                inner.by_connection.remove(&member);
            }
            inner.by_name.remove(&name);
            DisconnectOutcome::PrimaryRemoved(name)
        } else {
            entry.pool.retain(|c| *c != conn);
            DisconnectOutcome::PoolMemberRemoved(name)
        }
    }

    /// In-process query surface (spec §4.2a); what a host's own admin layer
    /// would be built against.
    pub async fn snapshot(&self) -> Vec<ServiceSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .by_name
            .values()
            .map(|entry| ServiceSnapshot {
                service_name: entry.service_name.clone(),
                methods: entry.methods.clone(),
                version: entry.version.clone(),
                pool_size: entry.pool.len() + 1,
                connected_at: entry.connected_at,
                last_heartbeat: entry.last_heartbeat,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_register_creates_entry_as_primary() {
        let registry = Registry::new();
        let outcome = registry
            .register(1, "alpha".into(), vec!["echo".into()], None, None)
            .await;
        assert!(matches!(outcome, RegisterOutcome::Registered));
        assert!(registry.contains("alpha").await);
        assert_eq!(registry.primary_connection("alpha").await, Some(1));
    }

    #[tokio::test]
    async fn duplicate_register_without_pool_index_is_rejected() {
        let registry = Registry::new();
        registry
            .register(1, "alpha".into(), vec![], None, None)
            .await;
        let outcome = registry
            .register(2, "alpha".into(), vec![], None, None)
            .await;
        assert!(matches!(outcome, RegisterOutcome::AlreadyRegistered));
        // The existing entry is untouched.
        assert_eq!(registry.primary_connection("alpha").await, Some(1));
    }

    #[tokio::test]
    async fn register_with_pool_index_attaches_member() {
        let registry = Registry::new();
        registry
            .register(1, "alpha".into(), vec![], None, None)
            .await;
        let outcome = registry
            .register(2, "alpha".into(), vec![], None, Some(0))
            .await;
        assert!(matches!(outcome, RegisterOutcome::PoolMemberAttached));
    }

    #[tokio::test]
    async fn round_robin_egress_cycles_through_pool() {
        let registry = Registry::new();
        registry
            .register(1, "b".into(), vec![], None, None)
            .await;
        registry.register(2, "b".into(), vec![], None, Some(1)).await;
        registry.register(3, "b".into(), vec![], None, Some(2)).await;

        let mut seen = Vec::new();
        for _ in 0..9 {
            seen.push(registry.select_egress("b", None).await.unwrap());
        }
        let mut counts = HashMap::new();
        for conn in seen {
            *counts.entry(conn).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 3);
        for count in counts.values() {
            assert_eq!(*count, 3);
        }
    }

    #[tokio::test]
    async fn dead_member_is_dropped_and_retry_uses_remaining() {
        let registry = Registry::new();
        registry.register(1, "b".into(), vec![], None, None).await;
        registry.register(2, "b".into(), vec![], None, Some(1)).await;

        let first = registry.select_egress("b", None).await.unwrap();
        let retried = registry.select_egress("b", Some(first)).await.unwrap();
        assert_ne!(retried, first);

        // The dead member no longer appears in subsequent selections.
        for _ in 0..5 {
            assert_eq!(registry.select_egress("b", None).await, Some(retried));
        }
    }

    #[tokio::test]
    async fn disconnecting_primary_removes_whole_entry_including_pool() {
        let registry = Registry::new();
        registry.register(1, "b".into(), vec![], None, None).await;
        registry.register(2, "b".into(), vec![], None, Some(1)).await;

        let outcome = registry.disconnect(1).await;
        assert_eq!(outcome, DisconnectOutcome::PrimaryRemoved("b".into()));
        assert!(!registry.contains("b").await);
    }

    #[tokio::test]
    async fn disconnecting_pool_member_only_trims_member() {
        let registry = Registry::new();
        registry.register(1, "b".into(), vec![], None, None).await;
        registry.register(2, "b".into(), vec![], None, Some(1)).await;

        let outcome = registry.disconnect(2).await;
        assert_eq!(outcome, DisconnectOutcome::PoolMemberRemoved("b".into()));
        assert!(registry.contains("b").await);
        assert_eq!(registry.select_egress("b", None).await, Some(1));
    }

    #[tokio::test]
    async fn snapshot_reports_registered_services() {
        let registry = Registry::new();
        registry
            .register(1, "a".into(), vec!["echo".into()], Some("1.0".into()), None)
            .await;
        registry.register(2, "b".into(), vec![], None, None).await;
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|s| s.service_name == "a" && s.methods == vec!["echo".to_string()]));
    }
}
