//! Transport trait and implementations

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::{InMemoryTransport, MessageHold, TransportOp, STAFF_SENDER_ID};

use async_trait::async_trait;

use crate::error::Result;
use crate::structs::{ChatSession, Message, MessageKind, SendAck};

/// Capability set consumed by the engine. Implementations carry no engine
/// logic; they only talk to the support backend.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Sessions of the current principal, in server order.
    async fn list_sessions(&self) -> Result<Vec<ChatSession>>;

    /// Create a session already enqueued for staff (`WAITING_STAFF`).
    async fn quick_create(&self) -> Result<ChatSession>;

    /// Full message history of a session.
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Post a message. The acknowledgment does not echo the content.
    async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<SendAck>;
}
