//! Lifecycle events (spec §6 "External collaborators"). Emitted on a
//! `tokio::sync::broadcast` channel so a host application can subscribe
//! without the Client needing to know who, if anyone, is listening.

use ipc_core::ErrorCode;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Connected,
    Disconnected,
    Registered,
    MethodExecuted {
        method: String,
        request_id: String,
        success: bool,
        error: Option<ErrorCode>,
    },
    ResponseReceived {
        request_id: String,
        success: bool,
        error: Option<ErrorCode>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Default channel capacity; a slow or absent subscriber can fall behind by
/// this many events before older ones are dropped (`broadcast`'s usual
/// lagged-receiver behavior — callers that care should drain promptly).
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { sender }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// A closed channel (no subscribers) is not an error — events are fire
    /// and forget from the Client's point of view.
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }
}
