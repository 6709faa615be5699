//! The Client's connection pool (spec §3 `PooledSocket`, §4.3). Each member
//! is an independent registered connection to the Gateway; outgoing frames
//! are spread round-robin across healthy members, failures are tracked per
//! member, and a dead member reconnects on its own exponential backoff
//! without disturbing the others.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ipc_core::{ErrorCode, IpcError, Message, RemoteError, Result};

use crate::config::ClientConfig;
use crate::events::{EventBus, LifecycleEvent, LogLevel};
use crate::transport;

const UNHEALTHY_ERROR_THRESHOLD: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const HEALTH_STALE_AFTER: Duration = Duration::from_secs(60);

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

struct Member {
    outbox: Option<mpsc::UnboundedSender<Message>>,
    connected: bool,
    healthy: bool,
    error_count: u32,
    last_used: i64,
    tasks: Vec<JoinHandle<()>>,
}

impl Member {
    fn disconnected() -> Self {
        Member {
            outbox: None,
            connected: false,
            healthy: false,
            error_count: 0,
            last_used: now_millis(),
            tasks: Vec::new(),
        }
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

pub struct Pool {
    config: Arc<ClientConfig>,
    methods: Vec<String>,
    members: Mutex<Vec<Member>>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    events: EventBus,
    current_index: AtomicUsize,
    shutting_down: AtomicBool,
    health_ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Opens `config.pool_size` connections concurrently. If any initial
    /// connect fails, the whole operation fails and any members that did
    /// come up are torn down (spec §4.3 "Creation").
    pub async fn create(
        config: Arc<ClientConfig>,
        methods: Vec<String>,
        inbound_tx: mpsc::UnboundedSender<Message>,
        events: EventBus,
    ) -> Result<Arc<Pool>> {
        let pool = Arc::new(Pool {
            config,
            methods,
            members: Mutex::new((0..0).map(|_| Member::disconnected()).collect()),
            inbound_tx,
            events,
            current_index: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            health_ticker: Mutex::new(None),
        });

        let attempts = futures::future::join_all(
            (0..pool.config.pool_size).map(|index| pool.connect_member(index)),
        )
        .await;

        let mut members = Vec::with_capacity(pool.config.pool_size);
        let mut first_error = None;
        for attempt in attempts {
            match attempt {
                Ok(member) => members.push(member),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    members.push(Member::disconnected());
                }
            }
        }

        if let Some(err) = first_error {
            for member in members.iter_mut() {
                member.abort_tasks();
                member.outbox = None;
            }
            return Err(err);
        }

        *pool.members.lock().await = members;
        pool.start_health_ticker();
        Ok(pool)
    }

    async fn connect_member(&self, index: usize) -> Result<Member> {
        let (reader, writer) = transport::connect_and_register(
            &self.config.socket_path,
            self.config.codec,
            &self.config.service_name,
            &self.methods,
            Some(index),
        )
        .await?;
        Ok(self.spawn_member_tasks(index, reader, writer))
    }

    fn spawn_member_tasks(
        &self,
        index: usize,
        mut reader: transport::FrameReader,
        mut writer: transport::FrameWriter,
    ) -> Member {
        let codec = self.config.codec;
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();

        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if writer.write_message(codec, &message).await.is_err() {
                    break;
                }
            }
        });

        let inbound_tx = self.inbound_tx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.read_message(codec).await {
                    Ok(Some(message)) => {
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });

        Member {
            outbox: Some(outbox_tx),
            connected: true,
            healthy: true,
            error_count: 0,
            last_used: now_millis(),
            tasks: vec![writer_task, reader_task],
        }
    }

    /// Round-robin selection with unhealthy fallback (spec §4.3
    /// "Selection"): scan starting at the rotating cursor, return the first
    /// `connected && healthy` member; if none, the first `connected` member
    /// regardless of health; fail `NOT_CONNECTED` if none are connected.
    pub async fn get_connection(&self) -> Result<usize> {
        let mut members = self.members.lock().await;
        let n = members.len();
        if n == 0 {
            return Err(not_connected());
        }
        let start = self.current_index.fetch_add(1, Ordering::SeqCst) % n;

        let mut fallback = None;
        for offset in 0..n {
            let idx = (start + offset) % n;
            if members[idx].connected {
                if members[idx].healthy {
                    members[idx].last_used = now_millis();
                    return Ok(idx);
                }
                fallback.get_or_insert(idx);
            }
        }
        if let Some(idx) = fallback {
            members[idx].last_used = now_millis();
            return Ok(idx);
        }
        Err(not_connected())
    }

    /// Selects a member and writes `message` on it, accounting errors and
    /// triggering reconnection on failure.
    pub async fn send(self: &Arc<Self>, message: Message) -> Result<()> {
        let idx = self.get_connection().await?;
        let outbox = {
            let members = self.members.lock().await;
            members[idx].outbox.clone()
        };
        match outbox {
            Some(outbox) if outbox.send(message).is_ok() => Ok(()),
            _ => {
                self.record_error(idx).await;
                Err(IpcError::Remote(RemoteError::new(
                    ErrorCode::ConnectionLost,
                    format!("pool member {idx} is no longer writable"),
                )))
            }
        }
    }

    async fn record_error(self: &Arc<Self>, index: usize) {
        let should_reconnect = {
            let mut members = self.members.lock().await;
            let member = &mut members[index];
            member.error_count += 1;
            if member.error_count >= UNHEALTHY_ERROR_THRESHOLD {
                member.healthy = false;
            }
            if member.connected {
                member.connected = false;
                member.healthy = false;
                member.abort_tasks();
                member.outbox = None;
                true
            } else {
                false
            }
        };
        if should_reconnect && self.config.auto_reconnect && !self.shutting_down.load(Ordering::SeqCst) {
            self.schedule_reconnect(index, 0);
        }
    }

    /// Schedules a reconnect attempt for `index` after an exponential
    /// backoff (spec §4.3 "Reconnection"): `reconnect_delay * 1.5^attempt`,
    /// clamped to 30s.
    fn schedule_reconnect(self: &Arc<Self>, index: usize, attempt: u32) {
        let pool = self.clone();
        let delay = backoff_delay(pool.config.reconnect_delay, attempt);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if pool.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            match pool.connect_member(index).await {
                Ok(member) => {
                    info!(member = index, "pool member reconnected");
                    let mut members = pool.members.lock().await;
                    members[index] = member;
                    drop(members);
                    pool.events.emit(LifecycleEvent::Connected);
                }
                Err(err) => {
                    let next_attempt = attempt + 1;
                    if next_attempt >= pool.config.max_reconnect_attempts {
                        warn!(member = index, %err, "pool member exhausted reconnect attempts, declaring dead");
                        pool.events.emit(LifecycleEvent::Log {
                            level: LogLevel::Error,
                            message: format!("pool member {index} declared dead after {next_attempt} attempts"),
                        });
                        return;
                    }
                    debug!(member = index, attempt = next_attempt, %err, "reconnect attempt failed, rescheduling");
                    pool.schedule_reconnect(index, next_attempt);
                }
            }
        });
    }

    fn start_health_ticker(self: &Arc<Self>) {
        let pool = self.clone();
        let interval = self.config.health_check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if pool.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                pool.run_health_check().await;
            }
        });
        *self
            .health_ticker
            .try_lock()
            .expect("health_ticker is only touched at creation and shutdown") = Some(handle);
    }

    async fn run_health_check(self: &Arc<Self>) {
        let now = now_millis();
        let stale_indices: Vec<usize> = {
            let members = self.members.lock().await;
            members
                .iter()
                .enumerate()
                .filter(|(_, m)| {
                    m.connected
                        && now.saturating_sub(m.last_used) as u64
                            > HEALTH_STALE_AFTER.as_millis() as u64
                })
                .map(|(i, _)| i)
                .collect()
        };
        for index in stale_indices {
            let heartbeat = Message::Heartbeat {
                from: self.config.service_name.clone(),
                timestamp: now,
            };
            let outbox = {
                let members = self.members.lock().await;
                members[index].outbox.clone()
            };
            let write_ok = outbox.map(|o| o.send(heartbeat).is_ok()).unwrap_or(false);
            if !write_ok {
                let mut members = self.members.lock().await;
                members[index].healthy = false;
            }
        }
    }

    pub async fn healthy_member_count(&self) -> usize {
        self.members.lock().await.iter().filter(|m| m.healthy).count()
    }

    pub async fn connected_member_count(&self) -> usize {
        self.members.lock().await.iter().filter(|m| m.connected).count()
    }

    /// Sets shutting-down, cancels every reconnect/io task, and releases
    /// every member's transport (spec §4.3 "Shutdown").
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(ticker) = self.health_ticker.lock().await.take() {
            ticker.abort();
        }
        let mut members = self.members.lock().await;
        for member in members.iter_mut() {
            member.abort_tasks();
            member.outbox = None;
            member.connected = false;
            member.healthy = false;
        }
        members.clear();
    }
}

fn not_connected() -> IpcError {
    IpcError::Remote(RemoteError::new(ErrorCode::NotConnected, "no pool member is connected"))
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let scaled = base.as_secs_f64() * 1.5f64.powi(attempt as i32);
    Duration::from_secs_f64(scaled).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_clamps_to_thirty_seconds() {
        let delay = backoff_delay(Duration::from_secs(5), 10);
        assert_eq!(delay, MAX_BACKOFF);
    }

    #[test]
    fn backoff_grows_by_one_point_five_per_attempt() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs_f64(5.0));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs_f64(7.5));
    }
}
