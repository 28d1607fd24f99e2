//! In-memory support desk
//!
//! Simulates the support backend for one customer, including the staff side
//! (accepting, merging and closing conversations). Used by the demo CLI and
//! by tests, which also rely on its call counters and failure injection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::TransportAdapter;
use crate::error::{Result, SupportChatError};
use crate::structs::{ChatSession, DeliveryState, Message, MessageKind, SendAck, SessionStatus};

pub const STAFF_SENDER_ID: &str = "staff";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOp {
    ListSessions,
    QuickCreate,
    GetMessages,
    SendMessage,
}

#[derive(Debug, Default)]
struct Desk {
    /// Newest first, as the backend lists them.
    sessions: Vec<ChatSession>,
    messages: HashMap<String, Vec<Message>>,
    next_session: u32,
    next_message: u64,
    failures: HashMap<TransportOp, VecDeque<SupportChatError>>,
    calls: HashMap<TransportOp, usize>,
    message_fetches: HashMap<String, usize>,
    hold: Option<MessageHold>,
}

impl Desk {
    fn record(&mut self, op: TransportOp) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn insert_session(&mut self, status: SessionStatus) -> ChatSession {
        self.next_session += 1;
        let session = ChatSession::new(format!("S{}", self.next_session), status);
        self.sessions.insert(0, session.clone());
        self.messages.entry(session.id.clone()).or_default();
        session
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut ChatSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| SupportChatError::ServerRejection(format!("unknown session {}", session_id)))
    }

    fn push_message(
        &mut self,
        session_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Message {
        self.next_message += 1;
        let message = Message {
            id: format!("m{}", self.next_message),
            session_id: session_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.map(str::to_string),
            content: content.to_string(),
            created_at,
            delivery_state: DeliveryState::Confirmed,
        };
        self.messages
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }
}

/// Parks the next `get_messages` call until released.
#[derive(Debug, Clone, Default)]
pub struct MessageHold {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl MessageHold {
    /// Resolves once the held call is in flight.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call complete.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug)]
pub struct InMemoryTransport {
    customer_id: String,
    desk: Mutex<Desk>,
}

impl InMemoryTransport {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            desk: Mutex::new(Desk::default()),
        }
    }

    fn desk(&self) -> MutexGuard<'_, Desk> {
        self.desk.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    // ========== Staff Side ==========

    /// Seed a session in the given status.
    pub fn open_session(&self, status: SessionStatus) -> ChatSession {
        self.desk().insert_session(status)
    }

    /// Seed a message with an explicit timestamp.
    pub fn seed_message(
        &self,
        session_id: &str,
        sender_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Message {
        self.desk()
            .push_message(session_id, sender_id, None, content, created_at)
    }

    /// A staff member picks the conversation up.
    pub fn accept(&self, session_id: &str) -> Result<()> {
        self.desk().session_mut(session_id)?.status = SessionStatus::StaffConnected;
        Ok(())
    }

    /// Staff releases the conversation back to the queue.
    pub fn requeue(&self, session_id: &str) -> Result<()> {
        self.desk().session_mut(session_id)?.status = SessionStatus::WaitingStaff;
        Ok(())
    }

    pub fn post_staff_message(&self, session_id: &str, content: &str) -> Message {
        self.desk().push_message(
            session_id,
            STAFF_SENDER_ID,
            Some("Support"),
            content,
            Utc::now(),
        )
    }

    /// Merge `from` into a fresh session carrying its history and status.
    /// `from` is closed.
    pub fn merge_into_new(&self, from: &str) -> Result<ChatSession> {
        let mut desk = self.desk();
        let status = desk.session_mut(from)?.status;
        desk.session_mut(from)?.status = SessionStatus::Closed;
        let merged = desk.insert_session(status);
        let history: Vec<Message> = desk
            .messages
            .get(from)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut m| {
                m.session_id = merged.id.clone();
                m
            })
            .collect();
        desk.messages.insert(merged.id.clone(), history);
        Ok(merged)
    }

    pub fn close_session(&self, session_id: &str) -> Result<()> {
        self.desk().session_mut(session_id)?.status = SessionStatus::Closed;
        Ok(())
    }

    // ========== Test Hooks ==========

    /// Make the next call of `op` fail with `err`. Queued per operation.
    pub fn fail_next(&self, op: TransportOp, err: SupportChatError) {
        self.desk().failures.entry(op).or_default().push_back(err);
    }

    pub fn calls(&self, op: TransportOp) -> usize {
        self.desk().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of `get_messages` calls for one session.
    pub fn message_fetches(&self, session_id: &str) -> usize {
        self.desk()
            .message_fetches
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }

    /// Park the next `get_messages` call until the returned hold is released.
    pub fn hold_next_fetch(&self) -> MessageHold {
        let hold = MessageHold::default();
        self.desk().hold = Some(hold.clone());
        hold
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.desk().sessions.clone()
    }

    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.desk()
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransportAdapter for InMemoryTransport {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>> {
        let mut desk = self.desk();
        desk.record(TransportOp::ListSessions)?;
        Ok(desk.sessions.clone())
    }

    async fn quick_create(&self) -> Result<ChatSession> {
        let mut desk = self.desk();
        desk.record(TransportOp::QuickCreate)?;
        Ok(desk.insert_session(SessionStatus::WaitingStaff))
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let hold = {
            let mut desk = self.desk();
            desk.record(TransportOp::GetMessages)?;
            *desk
                .message_fetches
                .entry(session_id.to_string())
                .or_default() += 1;
            desk.hold.take()
        };

        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }

        let desk = self.desk();
        let mut messages = desk.messages.get(session_id).cloned().unwrap_or_default();
        messages.sort_by(Message::chronological);
        Ok(messages)
    }

    async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        _kind: MessageKind,
    ) -> Result<SendAck> {
        let mut desk = self.desk();
        desk.record(TransportOp::SendMessage)?;
        let status = desk.session_mut(session_id)?.status;
        if !status.accepts_messages() {
            return Err(SupportChatError::ServerRejection(format!(
                "session {} is {}",
                session_id, status
            )));
        }
        let message = desk.push_message(session_id, &self.customer_id, None, content, Utc::now());
        Ok(SendAck {
            message_id: Some(message.id),
        })
    }
}
