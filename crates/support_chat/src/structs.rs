//! Support chat data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Status of a support session as reported by the server.
///
/// Serialized as the enumerated wire strings (`AI`, `WAITING_STAFF`,
/// `STAFF_CONNECTED`, `CLOSED`).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Stateless automated assistant flow.
    #[default]
    #[serde(rename = "AI")]
    Ai,
    /// Enqueued, no staff member has accepted yet.
    WaitingStaff,
    /// A staff member accepted the conversation.
    StaffConnected,
    /// Conversation is over.
    Closed,
}

impl SessionStatus {
    /// Whether the session may still be reused for a staff conversation.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Whether the customer may send messages in this state.
    pub fn accepts_messages(&self) -> bool {
        matches!(self, Self::StaffConnected)
    }

    /// Local state for a session bound in staff mode. A server-side `AI`
    /// session has no staff attached yet, so it counts as waiting.
    pub fn as_staff_state(&self) -> Self {
        match self {
            Self::Ai => Self::WaitingStaff,
            other => *other,
        }
    }

    /// The wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "AI",
            Self::WaitingStaff => "WAITING_STAFF",
            Self::StaffConnected => "STAFF_CONNECTED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One support conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            id: id.into(),
            status,
            created_at: Utc::now(),
        }
    }
}

/// Whether a message has been acknowledged by the server.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Inserted locally, not yet seen in a server listing.
    Pending,
    /// Part of the authoritative server list.
    #[default]
    Confirmed,
}

/// Message kind accepted by `sendMessage`. Only text is supported.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    #[default]
    Text,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque, stable identity. Locally generated ids carry the `local-` prefix.
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Never sent by the server; anything deserialized is confirmed.
    #[serde(default, skip_serializing)]
    pub delivery_state: DeliveryState,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.delivery_state == DeliveryState::Pending
    }

    /// Ordering key: `created_at` first, then `id`.
    pub fn chronological(a: &Message, b: &Message) -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Acknowledgment returned by `sendMessage`. Carries no message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Widget mode selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    Ai,
    Staff,
}

/// Client-side view of the bound session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

/// The session the server currently treats as the customer's conversation:
/// the first non-closed entry in listing order.
pub fn authoritative_session(sessions: &[ChatSession]) -> Option<&ChatSession> {
    sessions.iter().find(|s| s.status.is_active())
}
