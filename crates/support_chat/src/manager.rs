//! Session Manager - top-level orchestrator of the support chat widget

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::SupportChatConfig;
use crate::error::{Result, SupportChatError};
use crate::events::SessionEvent;
use crate::machine::{MachineEvent, StateTransition};
use crate::poller::StatusPoller;
use crate::structs::{
    authoritative_session, Binding, ChatMode, ChatSession, Message, MessageKind, SendAck,
    SessionStatus,
};
use crate::sync::{Shared, SyncReport, Trigger};
use crate::transport::TransportAdapter;

/// One open chat widget.
///
/// Owns the binding, the message store and the poller. All mode changes go
/// through its methods; the session state machine is the single source of
/// truth for what the widget shows.
pub struct SessionManager {
    shared: Arc<Shared>,
    poller: Mutex<Option<StatusPoller>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn TransportAdapter>, config: SupportChatConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(transport, config)),
            poller: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn poller(&self) -> MutexGuard<'_, Option<StatusPoller>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn mode(&self) -> ChatMode {
        if self.shared.lock().session.is_some() {
            ChatMode::Staff
        } else {
            ChatMode::Ai
        }
    }

    pub fn state(&self) -> SessionStatus {
        self.shared.lock().machine.state()
    }

    pub fn binding(&self) -> Option<Binding> {
        self.shared.lock().binding()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().store.messages()
    }

    pub fn transition_history(&self) -> Vec<StateTransition> {
        self.shared.lock().machine.history().to_vec()
    }

    pub fn is_polling(&self) -> bool {
        self.poller()
            .as_ref()
            .is_some_and(StatusPoller::is_running)
    }

    /// Switch to the stateless assistant. The server-side session is left
    /// as it is.
    pub fn select_ai(&self) {
        self.stop_polling();
        self.shared.unbind(MachineEvent::AiSelected);
    }

    /// Enter staff mode.
    ///
    /// Reuses the first non-closed session of the customer, or quick-creates
    /// one. If a session is already bound this only re-validates it. A failed
    /// lookup reports `ConnectFailed` and leaves any binding in place.
    pub async fn select_staff(&self) -> Result<Binding> {
        let _connecting = self.connect_lock.lock().await;

        if let Some(binding) = self.binding() {
            if binding.status != SessionStatus::Closed {
                return self.revalidate().await;
            }
        }

        let epoch = self.shared.lock().epoch;
        let (session, history, reused) = match self.resolve_session().await {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.connect_failed(e)),
        };

        let binding = self.shared.bind(&session, history, reused, epoch)?;
        self.start_polling();
        Ok(binding)
    }

    async fn resolve_session(&self) -> Result<(ChatSession, Vec<Message>, bool)> {
        let transport = &self.shared.transport;
        let sessions = transport.list_sessions().await?;

        if let Some(existing) = authoritative_session(&sessions) {
            let history = match transport.get_messages(&existing.id).await {
                Ok(history) => history,
                Err(e) if e.is_authentication() => return Err(e),
                Err(e) => {
                    // The first tick fetches the full history anyway.
                    warn!(session_id = %existing.id, "history fetch failed: {}", e);
                    Vec::new()
                }
            };
            return Ok((existing.clone(), history, true));
        }

        let created = transport.quick_create().await?;
        if created.status != SessionStatus::WaitingStaff {
            return Err(SupportChatError::UnexpectedStatus {
                id: created.id,
                status: created.status,
            });
        }
        Ok((created, Vec::new(), false))
    }

    async fn revalidate(&self) -> Result<Binding> {
        if let Err(e) = self.shared.sync(Trigger::Reconnect).await {
            return Err(self.connect_failed(e));
        }
        self.start_polling();
        self.binding().ok_or(SupportChatError::NotBound)
    }

    fn connect_failed(&self, err: SupportChatError) -> SupportChatError {
        warn!("support chat connect failed: {}", err);
        self.shared.events.emit(SessionEvent::ConnectFailed {
            reason: err.to_string(),
        });
        SupportChatError::ConnectFailed(Box::new(err))
    }

    /// Send a text message to staff.
    ///
    /// Rejected locally unless staff is connected. On success an optimistic
    /// message is inserted and a refresh runs right away.
    pub async fn send(&self, content: &str) -> Result<SendAck> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SupportChatError::EmptyMessage);
        }

        let (session_id, epoch) = {
            let inner = self.shared.lock();
            let session = inner.session.as_ref().ok_or(SupportChatError::NotBound)?;
            let status = inner.machine.state();
            if !status.accepts_messages() {
                let err = SupportChatError::SendNotPermitted(status);
                self.shared.events.emit(SessionEvent::SendRejected {
                    reason: err.to_string(),
                });
                return Err(err);
            }
            (session.id.clone(), inner.epoch)
        };

        let ack = match self
            .shared
            .transport
            .send_message(&session_id, content, MessageKind::Text)
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                if matches!(e, SupportChatError::ServerRejection(_)) {
                    warn!(session_id = %session_id, "send rejected by server: {}", e);
                    self.shared.events.emit(SessionEvent::SendRejected {
                        reason: e.to_string(),
                    });
                }
                return Err(e);
            }
        };

        {
            let mut inner = self.shared.lock();
            let still_bound = inner.epoch == epoch
                && inner.session.as_ref().is_some_and(|s| s.id == session_id);
            if still_bound {
                let customer_id = self.shared.config.customer_id.clone();
                inner.store.append(content, &customer_id);
            }
        }

        if let Err(e) = self.shared.sync(Trigger::Send).await {
            warn!(session_id = %session_id, "refresh after send failed: {}", e);
            if e.is_authentication() {
                self.shared.events.emit(SessionEvent::AuthenticationRequired {
                    reason: e.to_string(),
                });
            }
        }

        Ok(ack)
    }

    /// Refresh now instead of waiting for the next tick.
    pub async fn refresh(&self) -> Result<SyncReport> {
        self.shared.sync(Trigger::Manual).await
    }

    /// Restart polling for the current binding, e.g. after re-authenticating.
    pub fn resume_polling(&self) -> Result<()> {
        match self.binding() {
            Some(binding) if binding.status != SessionStatus::Closed => {
                self.start_polling();
                Ok(())
            }
            _ => Err(SupportChatError::NotBound),
        }
    }

    /// Stop the poller but keep the binding and history.
    pub fn stop_polling(&self) {
        if let Some(poller) = self.poller().take() {
            poller.stop();
        }
    }

    fn start_polling(&self) {
        let mut poller = self.poller();
        if poller.as_ref().is_some_and(StatusPoller::is_running) {
            return;
        }
        if let Some(previous) = poller.take() {
            previous.stop();
        }
        *poller = Some(StatusPoller::start(Arc::clone(&self.shared)));
    }

    /// Close the widget. Stops polling, unbinds and clears the messages; the
    /// server-side session is not deleted.
    pub fn close(&self) {
        self.stop_polling();
        self.shared.unbind(MachineEvent::CloseRequested);
        info!("support chat closed");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
