//! The accept loop and per-connection state machine (spec §4.2).
//!
//! State machine per connection: `ACCEPTED → REGISTERED → CLOSED`. In
//! `ACCEPTED` only `REGISTER` is accepted; anything else is an
//! `InvalidMessage` error reply followed by close. In `REGISTERED`, `CALL`,
//! `RESPONSE`, and `HEARTBEAT` are accepted; anything else gets an `ERROR`
//! reply but the connection stays open.
//!
//! Each connection is driven by two tasks: a reader, running the state
//! machine below, and a writer, draining an `mpsc` outbox registered with
//! the `Registry` at accept time. Routing a CALL/RESPONSE to another
//! connection is just `registry.send_to(target, message)` — it never
//! reaches across tasks into someone else's socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ipc_core::{ErrorCode, IpcContext, Message, RemoteError, ResponseStatus};

use crate::config::GatewayConfig;
use crate::connection::{self, FrameReader};
use crate::registry::{ConnectionId, DisconnectOutcome, RegisterOutcome, Registry};

#[derive(Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    registry: Arc<Registry>,
    next_connection_id: Arc<AtomicU64>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Gateway {
            config: Arc::new(config),
            registry: Arc::new(Registry::new()),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Binds `config.socket_path` (unlinking a stale file first, per spec
    /// §6) and serves connections until the listener errors.
    #[tracing::instrument(skip(self), fields(socket_path = %self.config.socket_path.display()))]
    pub async fn serve(&self) -> std::io::Result<()> {
        let path = self.config.socket_path.clone();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&path)?;
        info!(socket_path = %path.display(), "gateway listening");

        loop {
            let (stream, _addr) = listener.accept().await?;
            let conn_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
            let gateway = self.clone();
            tokio::spawn(async move {
                gateway.handle_connection(conn_id, stream).await;
            });
        }
    }

    async fn handle_connection(&self, conn_id: ConnectionId, stream: UnixStream) {
        info!(conn_id, "connection accepted");
        let (mut reader, mut writer) = connection::split(stream);
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
        self.registry.attach_outbox(conn_id, outbox_tx.clone()).await;

        let codec = self.config.codec;
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if writer.write_message(codec, &message).await.is_err() {
                    break;
                }
            }
        });

        self.read_loop(conn_id, &mut reader, &outbox_tx).await;

        drop(outbox_tx);
        let _ = writer_task.await;
        self.on_disconnect(conn_id).await;
    }

    async fn read_loop(
        &self,
        conn_id: ConnectionId,
        reader: &mut FrameReader,
        outbox: &mpsc::UnboundedSender<Message>,
    ) {
        let mut registered = false;
        loop {
            let message = match reader.read_message(self.config.codec).await {
                Ok(Some(m)) => m,
                Ok(None) => break,
                Err(err) => {
                    warn!(conn_id, %err, "connection read failed, closing");
                    break;
                }
            };

            let should_close = if !registered {
                self.handle_pre_register(conn_id, message, outbox, &mut registered).await
            } else {
                self.handle_registered(conn_id, message, outbox).await
            };
            if should_close {
                break;
            }
        }
    }

    /// Returns `true` if the connection should be closed.
    async fn handle_pre_register(
        &self,
        conn_id: ConnectionId,
        message: Message,
        outbox: &mpsc::UnboundedSender<Message>,
        registered: &mut bool,
    ) -> bool {
        let Message::Register(register) = message else {
            let _ = outbox.send(Message::Error {
                id: None,
                error: RemoteError::new(
                    ErrorCode::InvalidMessage,
                    "expected REGISTER as the first message on a new connection",
                ),
            });
            return true;
        };

        let pool_index = register.pool_index();
        let outcome = self
            .registry
            .register(
                conn_id,
                register.service_name.clone(),
                register.methods.clone(),
                register.version.clone(),
                pool_index,
            )
            .await;

        match outcome {
            RegisterOutcome::Registered | RegisterOutcome::PoolMemberAttached => {
                info!(conn_id, service = %register.service_name, pooled = pool_index.is_some(), "service registered");
                *registered = true;
                let _ = outbox.send(Message::RegisterAck);
                false
            }
            RegisterOutcome::AlreadyRegistered => {
                warn!(conn_id, service = %register.service_name, "duplicate registration rejected");
                let _ = outbox.send(Message::Error {
                    id: None,
                    error: RemoteError::new(ErrorCode::ConnectionFailed, "Service already registered"),
                });
                true
            }
        }
    }

    /// Returns `true` if the connection should be closed.
    async fn handle_registered(
        &self,
        conn_id: ConnectionId,
        message: Message,
        outbox: &mpsc::UnboundedSender<Message>,
    ) -> bool {
        match message {
            Message::Call {
                id,
                from,
                to,
                method,
                params,
                context,
            } => {
                self.route_call(id, from, to, method, params, context, outbox).await;
                false
            }
            Message::Response {
                id,
                from,
                to,
                status,
                data,
                error,
                context,
            } => {
                self.route_response(id, from, to, status, data, error, context).await;
                false
            }
            Message::Heartbeat { .. } => {
                self.registry.touch_heartbeat(conn_id).await;
                false
            }
            other => {
                warn!(conn_id, kind = other.kind(), "unexpected message type while registered");
                let _ = outbox.send(Message::Error {
                    id: None,
                    error: RemoteError::new(
                        ErrorCode::InvalidMessage,
                        format!("unexpected message type: {}", other.kind()),
                    ),
                });
                false
            }
        }
    }

    async fn route_call(
        &self,
        id: String,
        from: String,
        to: String,
        method: String,
        params: serde_json::Value,
        context: IpcContext,
        caller_outbox: &mpsc::UnboundedSender<Message>,
    ) {
        if let Err(err) = context.validate() {
            let _ = caller_outbox.send(Message::error_response(
                id,
                to,
                from,
                RemoteError::new(err.code(), err.to_string()),
                context,
            ));
            return;
        }
        if context.is_deadline_exceeded() {
            let _ = caller_outbox.send(Message::error_response(
                id,
                to,
                from,
                RemoteError::new(ErrorCode::DeadlineExceeded, "deadline already passed"),
                context,
            ));
            return;
        }
        if context.exceeds_depth_cap(self.config.max_call_depth) {
            let _ = caller_outbox.send(Message::error_response(
                id,
                to,
                from,
                RemoteError::new(
                    ErrorCode::MaxDepthExceeded,
                    format!("depth {} exceeds cap {}", context.depth, self.config.max_call_depth),
                ),
                context,
            ));
            return;
        }

        debug!(request_id = %id, %method, target = %to, "routing CALL");

        let mut dead = None;
        loop {
            let Some(target_conn) = self.registry.select_egress(&to, dead).await else {
                let known = self.registry.connected_services().await;
                warn!(request_id = %id, caller = %from, target = %to, "service not found, dropping CALL");
                let _ = caller_outbox.send(Message::error_response(
                    id,
                    to.clone(),
                    from,
                    RemoteError::new(
                        ErrorCode::ServiceNotFound,
                        format!("no such service: {to} (known: {})", known.join(", ")),
                    ),
                    context,
                ));
                return;
            };

            let call = Message::Call {
                id: id.clone(),
                from: from.clone(),
                to: to.clone(),
                method: method.clone(),
                params: params.clone(),
                context: context.clone(),
            };
            match self.registry.send_to(target_conn, call).await {
                Ok(()) => return,
                Err(failed_conn) => {
                    warn!(conn_id = failed_conn, target = %to, "write to pool member failed, retrying once");
                    dead = Some(failed_conn);
                }
            }
        }
    }

    async fn route_response(
        &self,
        id: String,
        from: String,
        to: String,
        status: ResponseStatus,
        data: Option<serde_json::Value>,
        error: Option<RemoteError>,
        context: IpcContext,
    ) {
        let Some(primary) = self.registry.primary_connection(&to).await else {
            debug!(request_id = %id, caller = %to, "caller disconnected, dropping RESPONSE");
            return;
        };
        debug!(request_id = %id, caller = %to, "routing RESPONSE");
        let response = Message::Response {
            id,
            from,
            to,
            status,
            data,
            error,
            context,
        };
        let _ = self.registry.send_to(primary, response).await;
    }

    async fn on_disconnect(&self, conn_id: ConnectionId) {
        match self.registry.disconnect(conn_id).await {
            DisconnectOutcome::PrimaryRemoved(name) => {
                info!(conn_id, service = %name, "primary connection closed, service deregistered");
            }
            DisconnectOutcome::PoolMemberRemoved(name) => {
                info!(conn_id, service = %name, "pool member connection closed");
            }
            DisconnectOutcome::Unregistered => {
                info!(conn_id, "unregistered connection closed");
            }
        }
    }
}
