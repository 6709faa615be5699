//! The Client core (spec §4.4): a single named service's view of the
//! fabric. Outgoing calls go out through the [`Pool`]; incoming `CALL`s are
//! dispatched to a registered [`Handler`] with its causal context pinned via
//! [`context_scope`] so any call the handler issues inherits it automatically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ipc_core::context::{generate_id, now_millis};
use ipc_core::{ErrorCode, IpcContext, IpcError, Message, RemoteError, ResponseStatus, Result};

use crate::config::ClientConfig;
use crate::context_scope;
use crate::events::{EventBus, LifecycleEvent, LogLevel};
use crate::pending::{self, PendingMap};
use crate::pool::Pool;

/// Implemented by a method handler registered for incoming `CALL`s. The
/// blanket impl below lets a plain async closure be passed to
/// [`ClientBuilder::on_call`] directly.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, params: Value, context: IpcContext) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Value, IpcContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send,
{
    async fn call(&self, params: Value, context: IpcContext) -> Result<Value> {
        (self)(params, context).await
    }
}

pub struct ClientBuilder {
    config: ClientConfig,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        ClientBuilder {
            config,
            handlers: HashMap::new(),
        }
    }

    pub fn on_call<H>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
        self
    }

    pub async fn connect(self) -> Result<Arc<Client>> {
        Client::connect(self.config, self.handlers).await
    }
}

pub struct Client {
    config: Arc<ClientConfig>,
    pool: Arc<Pool>,
    pending: Arc<PendingMap>,
    handlers: Arc<HashMap<String, Arc<dyn Handler>>>,
    events: EventBus,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    async fn connect(config: ClientConfig, handlers: HashMap<String, Arc<dyn Handler>>) -> Result<Arc<Client>> {
        let config = Arc::new(config);
        let methods: Vec<String> = handlers.keys().cloned().collect();
        let events = EventBus::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Message>();

        let pool = Pool::create(config.clone(), methods, inbound_tx, events.clone()).await?;

        let client = Arc::new(Client {
            config,
            pool,
            pending: Arc::new(PendingMap::new()),
            handlers: Arc::new(handlers),
            events,
            dispatch_task: Mutex::new(None),
            heartbeat_task: Mutex::new(None),
        });
        client.events.emit(LifecycleEvent::Connected);
        client.events.emit(LifecycleEvent::Registered);

        let dispatch_handle = tokio::spawn(client.clone().run_dispatch_loop(inbound_rx));
        *client.dispatch_task.lock().await = Some(dispatch_handle);

        let heartbeat_handle = tokio::spawn(client.clone().run_heartbeat_loop());
        *client.heartbeat_task.lock().await = Some(heartbeat_handle);

        Ok(client)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// A single call using the client's configured default timeout.
    pub async fn call(&self, to: &str, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(to, method, params, self.config.call_timeout).await
    }

    /// A single call bounded by an explicit wait timeout, distinct from the
    /// context's own ambient deadline (spec §4.4a "call_timeout" vs the
    /// propagated `deadline` — a caller may wait less than the full budget
    /// remaining on the causal chain without altering that budget for
    /// anyone downstream).
    pub async fn call_with_timeout(
        &self,
        to: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let context = self.build_outgoing_context(to, timeout);
        if context.exceeds_depth_cap(self.config.max_call_depth) {
            return Err(context.depth_error(self.config.max_call_depth));
        }
        if context.is_deadline_exceeded() {
            return Err(context.deadline_error());
        }

        let id = generate_id("req");
        let rx = self.pending.insert(id.clone()).await;
        let message = Message::Call {
            id: id.clone(),
            from: self.config.service_name.clone(),
            to: to.to_string(),
            method: method.to_string(),
            params,
            context,
        };
        if let Err(err) = self.pool.send(message).await {
            self.pending.complete(&id, Err(RemoteError::new(err.code(), err.to_string()))).await;
            return Err(err);
        }

        match tokio::time::timeout(timeout, pending::await_outcome(rx)).await {
            Ok(result) => result,
            Err(_) => {
                self.pending
                    .complete(
                        &id,
                        Err(RemoteError::new(
                            ErrorCode::Timeout,
                            format!("call to {to}::{method} timed out after {timeout:?}"),
                        )),
                    )
                    .await;
                Err(IpcError::Remote(RemoteError::new(
                    ErrorCode::Timeout,
                    format!("call to {to}::{method} timed out after {timeout:?}"),
                )))
            }
        }
    }

    /// Issues the same call against every target concurrently, failing the
    /// whole batch as soon as any one target fails.
    pub async fn call_all(&self, targets: &[&str], method: &str, params: Value) -> Result<Vec<Value>> {
        let results = futures::future::join_all(
            targets.iter().map(|target| self.call(target, method, params.clone())),
        )
        .await;
        results.into_iter().collect()
    }

    /// Issues the same call against every target concurrently and returns
    /// every outcome, successes and failures alike, instead of short-circuiting.
    pub async fn call_all_settled(&self, targets: &[&str], method: &str, params: Value) -> Vec<Result<Value>> {
        futures::future::join_all(targets.iter().map(|target| self.call(target, method, params.clone()))).await
    }

    /// Retries a call up to `max_attempts` times with exponential backoff,
    /// stopping early on a non-retryable `ErrorCode` (spec §7 retry policy).
    pub async fn call_with_retry(
        &self,
        to: &str,
        method: &str,
        params: Value,
        max_attempts: u32,
    ) -> Result<Value> {
        let attempts = max_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match self.call(to, method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retryable = err.code().is_retryable();
                    last_err = Some(err);
                    if !retryable || attempt + 1 == attempts {
                        break;
                    }
                    let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.pending
            .fail_all(ErrorCode::ConnectionLost, "client is shutting down")
            .await;
        if let Some(task) = self.dispatch_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.heartbeat_task.lock().await.take() {
            task.abort();
        }
    }

    /// The context to send with a CALL to `to`: the pinned parent context if
    /// this call is issued from inside a handler (nested), or a fresh
    /// root context otherwise, in both cases with `to` appended as the next
    /// hop (spec §8 scenarios 1/2 — the callee/RESPONSE context always
    /// includes the callee itself, at `depth = chain.len()`).
    fn build_outgoing_context(&self, to: &str, timeout: Duration) -> IpcContext {
        let base = context_scope::current()
            .unwrap_or_else(|| IpcContext::create(self.config.service_name.clone(), timeout.as_millis() as i64));
        base.extend(to)
    }

    async fn run_dispatch_loop(self: Arc<Self>, mut inbound_rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = inbound_rx.recv().await {
            match message {
                Message::Call { id, from, to, method, params, context } => {
                    let client = self.clone();
                    tokio::spawn(async move {
                        client.handle_incoming_call(id, from, to, method, params, context).await;
                    });
                }
                Message::Response { id, status, data, error, .. } => {
                    let outcome = match status {
                        ResponseStatus::Success => Ok(data.unwrap_or(Value::Null)),
                        ResponseStatus::Error => {
                            Err(error.unwrap_or_else(|| RemoteError::new(ErrorCode::InternalError, "missing error payload on ERROR response")))
                        }
                    };
                    let success = outcome.is_ok();
                    let error_code = outcome.as_ref().err().map(|e| e.code);
                    if !self.pending.complete(&id, outcome).await {
                        debug!(request_id = %id, "response for unknown or already-resolved request");
                    }
                    self.events.emit(LifecycleEvent::ResponseReceived { request_id: id, success, error: error_code });
                }
                Message::Heartbeat { .. } => {}
                Message::Error { id: Some(id), error } => {
                    self.pending.complete(&id, Err(error)).await;
                }
                Message::Error { id: None, error } => {
                    warn!(%error, "unsolicited ERROR message with no correlating request id");
                    self.events.emit(LifecycleEvent::Log { level: LogLevel::Warn, message: error.to_string() });
                }
                Message::Register(_) | Message::RegisterAck => {
                    debug!("unexpected REGISTER/REGISTER_ACK after handshake, ignoring");
                }
            }
        }
    }

    async fn handle_incoming_call(
        self: Arc<Self>,
        id: String,
        from: String,
        to: String,
        method: String,
        params: Value,
        context: IpcContext,
    ) {
        if context.exceeds_depth_cap(self.config.max_call_depth) {
            let err = context.depth_error(self.config.max_call_depth);
            self.reply_error(id, to, from, err, context).await;
            return;
        }
        if context.is_deadline_exceeded() {
            let err = context.deadline_error();
            self.reply_error(id, to, from, err, context).await;
            return;
        }

        let Some(handler) = self.handlers.get(&method).cloned() else {
            let err = IpcError::Remote(RemoteError::new(
                ErrorCode::MethodNotFound,
                format!("no handler registered for method {method}"),
            ));
            self.reply_error(id, to, from, err, context).await;
            return;
        };

        let result = context_scope::with_context(context.clone(), handler.call(params, context.clone())).await;
        match result {
            Ok(data) => {
                self.events.emit(LifecycleEvent::MethodExecuted {
                    method,
                    request_id: id.clone(),
                    success: true,
                    error: None,
                });
                let response = Message::success_response(id, to, from, data, context);
                if let Err(err) = self.pool.send(response).await {
                    warn!(%err, "failed to deliver successful response");
                }
            }
            Err(err) => {
                let code = err.code();
                self.events.emit(LifecycleEvent::MethodExecuted {
                    method,
                    request_id: id.clone(),
                    success: false,
                    error: Some(code),
                });
                self.reply_error(id, to, from, err, context).await;
            }
        }
    }

    /// `reply_from`/`reply_to` are the original CALL's `to`/`from` swapped:
    /// the response is sent from us back to whoever called us.
    async fn reply_error(&self, id: String, reply_from: String, reply_to: String, err: IpcError, context: IpcContext) {
        let remote = match err {
            IpcError::Remote(remote) => remote,
            other => RemoteError::new(other.code(), other.to_string()),
        };
        let response = Message::error_response(id, reply_from, reply_to, remote, context);
        if let Err(send_err) = self.pool.send(response).await {
            warn!(%send_err, "failed to deliver error response");
        }
    }

    async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            ticker.tick().await;
            let heartbeat = Message::Heartbeat {
                from: self.config.service_name.clone(),
                timestamp: now_millis(),
            };
            if let Err(err) = self.pool.send(heartbeat).await {
                debug!(%err, "heartbeat send failed, pool will reconnect on its own schedule");
            }
        }
    }
}

// Client::connect needs a live Gateway on the other end of a Unix socket, so
// it's exercised end to end in tests/client_integration.rs rather than here.
