//! Synchronization of the bound session against the server
//!
//! Every refresh (scheduled tick, post-send refresh, manual refresh) goes
//! through [`Shared::sync`], which holds the single in-flight permit. A
//! response is applied only while the epoch captured at request time is
//! still current; bind, rebind, unbind and poller stop all bump the epoch.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::SupportChatConfig;
use crate::error::{Result, SupportChatError};
use crate::events::{EventBus, SessionEvent};
use crate::machine::{MachineEvent, StateMachine};
use crate::store::{MergeCheckpoint, MessageStore};
use crate::structs::{authoritative_session, Binding, ChatSession, Message, SessionStatus};
use crate::transport::TransportAdapter;

/// What started a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    Send,
    Manual,
    Reconnect,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tick => "tick",
            Self::Send => "send",
            Self::Manual => "manual",
            Self::Reconnect => "reconnect",
        };
        f.write_str(name)
    }
}

/// Result of one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Another refresh was in flight; it re-runs once instead.
    pub coalesced: bool,
    /// Nothing bound (or the binding is closed), so nothing was fetched.
    pub idle: bool,
    /// At least one response belonged to a binding that is gone.
    pub discarded: bool,
    pub status_changed: bool,
    pub rebound: bool,
    /// The server closed the bound session.
    pub closed: bool,
}

#[derive(Debug, Clone)]
struct SyncTicket {
    session_id: String,
    epoch: u64,
    checkpoint: MergeCheckpoint,
}

enum SessionsApplied {
    Unchanged,
    StatusChanged,
    Rebound(SyncTicket),
    Closed,
    Stale,
}

pub(crate) struct Inner {
    pub(crate) session: Option<ChatSession>,
    pub(crate) machine: StateMachine,
    pub(crate) store: MessageStore,
    pub(crate) epoch: u64,
}

impl Inner {
    fn ticket(&self) -> Option<SyncTicket> {
        let session = self.session.as_ref()?;
        if self.machine.state() == SessionStatus::Closed {
            return None;
        }
        Some(SyncTicket {
            session_id: session.id.clone(),
            epoch: self.epoch,
            checkpoint: self.store.checkpoint(),
        })
    }

    fn is_current(&self, ticket: &SyncTicket) -> bool {
        self.epoch == ticket.epoch
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.id == ticket.session_id)
    }

    pub(crate) fn binding(&self) -> Option<Binding> {
        self.session.as_ref().map(|session| Binding {
            session_id: session.id.clone(),
            status: self.machine.state(),
            created_at: session.created_at,
        })
    }
}

#[derive(Debug, Default)]
struct GateState {
    in_flight: bool,
    rerun: bool,
}

/// The single "fetch in flight" flag.
#[derive(Debug, Default)]
struct RefreshGate {
    state: Mutex<GateState>,
}

impl RefreshGate {
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the permit, or leave a re-run request for the current holder.
    fn try_acquire(&self) -> Option<RefreshPermit<'_>> {
        let mut state = self.state();
        if state.in_flight {
            state.rerun = true;
            None
        } else {
            state.in_flight = true;
            Some(RefreshPermit {
                gate: self,
                released: false,
            })
        }
    }
}

struct RefreshPermit<'a> {
    gate: &'a RefreshGate,
    released: bool,
}

impl RefreshPermit<'_> {
    /// Consume a pending re-run request, or release the permit.
    fn rerun_requested(&mut self) -> bool {
        let mut state = self.gate.state();
        if state.rerun {
            state.rerun = false;
            true
        } else {
            state.in_flight = false;
            self.released = true;
            false
        }
    }
}

impl Drop for RefreshPermit<'_> {
    fn drop(&mut self) {
        if !self.released {
            let mut state = self.gate.state();
            state.in_flight = false;
            state.rerun = false;
        }
    }
}

pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn TransportAdapter>,
    pub(crate) config: SupportChatConfig,
    pub(crate) events: EventBus,
    inner: Mutex<Inner>,
    gate: RefreshGate,
}

impl Shared {
    pub(crate) fn new(transport: Arc<dyn TransportAdapter>, config: SupportChatConfig) -> Self {
        let store = MessageStore::new(config.poll_interval());
        Self {
            transport,
            config,
            events: EventBus::default(),
            inner: Mutex::new(Inner {
                session: None,
                machine: StateMachine::new(),
                store,
                epoch: 0,
            }),
            gate: RefreshGate::default(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every outstanding response stale.
    pub(crate) fn invalidate(&self) {
        self.lock().epoch += 1;
    }

    /// Bind a freshly resolved session, replacing any closed binding.
    ///
    /// Fails with `Superseded` if the epoch moved since `expected_epoch`,
    /// which happens when the user left staff mode while connecting.
    pub(crate) fn bind(
        &self,
        session: &ChatSession,
        history: Vec<Message>,
        reused: bool,
        expected_epoch: u64,
    ) -> Result<Binding> {
        let mut inner = self.lock();
        if inner.epoch != expected_epoch {
            return Err(SupportChatError::Superseded);
        }

        inner.machine.handle_event(MachineEvent::StaffBound {
            status: session.status.as_staff_state(),
        })?;
        inner.session = Some(session.clone());
        inner.epoch += 1;
        inner.store.reset(&session.id);
        let outcome = inner.store.merge(history);

        info!(
            session_id = %session.id,
            status = %inner.machine.state(),
            reused,
            messages = outcome.confirmed,
            "bound support session"
        );
        self.events.emit(SessionEvent::Bound {
            session_id: session.id.clone(),
            status: inner.machine.state(),
            reused,
        });
        if outcome.changed() {
            self.events.emit(SessionEvent::MessagesUpdated {
                session_id: session.id.clone(),
                count: inner.store.len(),
            });
        }

        inner.binding().ok_or(SupportChatError::NotBound)
    }

    /// Drop the binding and its messages, feeding `event` to the machine.
    pub(crate) fn unbind(&self, event: MachineEvent) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.store.clear();
        if let Err(e) = inner.machine.handle_event(event) {
            warn!("unbind: {}", e);
        }
        if let Some(session) = inner.session.take() {
            info!(session_id = %session.id, "unbound support session");
            self.events.emit(SessionEvent::Unbound {
                session_id: session.id,
            });
        }
    }

    /// Run one refresh under the in-flight permit.
    ///
    /// If a refresh is already running this returns immediately with
    /// `coalesced` set, and the running refresh goes around once more.
    pub(crate) async fn sync(&self, trigger: Trigger) -> Result<SyncReport> {
        let Some(mut permit) = self.gate.try_acquire() else {
            debug!(%trigger, "refresh already in flight, coalescing");
            return Ok(SyncReport {
                coalesced: true,
                ..SyncReport::default()
            });
        };

        loop {
            let result = self.sync_once(trigger).await;
            if !permit.rerun_requested() {
                return result;
            }
            debug!(%trigger, "re-running refresh requested while in flight");
        }
    }

    async fn sync_once(&self, trigger: Trigger) -> Result<SyncReport> {
        let ticket = self.lock().ticket();
        let Some(ticket) = ticket else {
            return Ok(SyncReport {
                idle: true,
                ..SyncReport::default()
            });
        };
        debug!(%trigger, session_id = %ticket.session_id, epoch = ticket.epoch, "refreshing");

        let mut report = SyncReport::default();
        let mut first_error: Option<SupportChatError> = None;

        match self.transport.get_messages(&ticket.session_id).await {
            Ok(messages) => {
                if !self.apply_messages(&ticket, messages) {
                    report.discarded = true;
                }
            }
            Err(e) if e.is_authentication() => return Err(e),
            Err(e) => {
                warn!(%trigger, session_id = %ticket.session_id, "message fetch failed: {}", e);
                first_error = Some(e);
            }
        }

        match self.transport.list_sessions().await {
            Ok(sessions) => match self.apply_sessions(&ticket, &sessions) {
                SessionsApplied::Unchanged => {}
                SessionsApplied::StatusChanged => report.status_changed = true,
                SessionsApplied::Closed => report.closed = true,
                SessionsApplied::Stale => report.discarded = true,
                SessionsApplied::Rebound(rebound) => {
                    report.rebound = true;
                    match self.transport.get_messages(&rebound.session_id).await {
                        Ok(messages) => {
                            if !self.apply_messages(&rebound, messages) {
                                report.discarded = true;
                            }
                        }
                        Err(e) if e.is_authentication() => return Err(e),
                        Err(e) => {
                            warn!(session_id = %rebound.session_id, "history refetch failed: {}", e);
                            first_error.get_or_insert(e);
                        }
                    }
                }
            },
            Err(e) if e.is_authentication() => return Err(e),
            Err(e) => {
                warn!(%trigger, "session listing failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn apply_messages(&self, ticket: &SyncTicket, messages: Vec<Message>) -> bool {
        let mut inner = self.lock();
        if !inner.is_current(ticket) {
            debug!(session_id = %ticket.session_id, "discarding stale message listing");
            return false;
        }

        let outcome = inner.store.merge_since(messages, ticket.checkpoint);
        if outcome.changed() {
            debug!(session_id = %ticket.session_id, ?outcome, "merged messages");
            self.events.emit(SessionEvent::MessagesUpdated {
                session_id: ticket.session_id.clone(),
                count: inner.store.len(),
            });
        }
        true
    }

    fn apply_sessions(&self, ticket: &SyncTicket, sessions: &[ChatSession]) -> SessionsApplied {
        let mut inner = self.lock();
        if !inner.is_current(ticket) {
            debug!(session_id = %ticket.session_id, "discarding stale session listing");
            return SessionsApplied::Stale;
        }

        if let Some(active) = authoritative_session(sessions) {
            if active.id != ticket.session_id {
                return self.rebind(&mut inner, ticket, active);
            }
        }

        let Some(bound) = sessions.iter().find(|s| s.id == ticket.session_id) else {
            debug!(session_id = %ticket.session_id, "bound session missing from listing");
            return SessionsApplied::Unchanged;
        };

        let event = if bound.status == SessionStatus::Closed {
            MachineEvent::ClosedByServer
        } else {
            MachineEvent::StatusObserved {
                status: bound.status.as_staff_state(),
            }
        };

        let transition = match inner.machine.handle_event(event) {
            Ok(transition) => transition,
            Err(e) => {
                warn!(session_id = %ticket.session_id, "ignoring status observation: {}", e);
                return SessionsApplied::Unchanged;
            }
        };
        if !transition.changed {
            return SessionsApplied::Unchanged;
        }

        info!(
            session_id = %ticket.session_id,
            from = %transition.from,
            to = %transition.to,
            "session status changed"
        );
        self.events.emit(SessionEvent::StatusChanged {
            session_id: ticket.session_id.clone(),
            from: transition.from,
            to: transition.to,
        });

        if transition.to == SessionStatus::Closed {
            inner.epoch += 1;
            self.events.emit(SessionEvent::ClosedByServer {
                session_id: ticket.session_id.clone(),
            });
            SessionsApplied::Closed
        } else {
            SessionsApplied::StatusChanged
        }
    }

    fn rebind(
        &self,
        inner: &mut Inner,
        ticket: &SyncTicket,
        active: &ChatSession,
    ) -> SessionsApplied {
        let transition = match inner.machine.handle_event(MachineEvent::Rebound {
            status: active.status.as_staff_state(),
        }) {
            Ok(transition) => transition,
            Err(e) => {
                warn!(session_id = %active.id, "cannot rebind: {}", e);
                return SessionsApplied::Unchanged;
            }
        };

        inner.session = Some(active.clone());
        inner.epoch += 1;
        inner.store.reset(&active.id);

        info!(from = %ticket.session_id, to = %active.id, "server merged conversations, rebinding");
        self.events.emit(SessionEvent::Rebound {
            from: ticket.session_id.clone(),
            to: active.id.clone(),
        });
        if transition.changed {
            self.events.emit(SessionEvent::StatusChanged {
                session_id: active.id.clone(),
                from: transition.from,
                to: transition.to,
            });
        }

        match inner.ticket() {
            Some(rebound) => SessionsApplied::Rebound(rebound),
            None => SessionsApplied::Unchanged,
        }
    }
}
