use serde::Serialize;
use tokio::sync::broadcast;

use crate::structs::SessionStatus;

/// Observable changes of the chat widget state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Bound {
        session_id: String,
        status: SessionStatus,
        reused: bool,
    },
    StatusChanged {
        session_id: String,
        from: SessionStatus,
        to: SessionStatus,
    },
    /// The server merged conversations and the widget followed.
    Rebound { from: String, to: String },
    MessagesUpdated { session_id: String, count: usize },
    ConnectFailed { reason: String },
    SendRejected { reason: String },
    PollDegraded {
        consecutive_failures: u32,
        reason: String,
    },
    PollRecovered,
    AuthenticationRequired { reason: String },
    ClosedByServer { session_id: String },
    Unbound { session_id: String },
}

/// Fan-out of [`SessionEvent`]s to any number of observers.
///
/// Emission never blocks. Slow observers lag and miss events; with no
/// observers events are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        tracing::trace!(?event, "session event");
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
