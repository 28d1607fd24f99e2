//! # Support Chat
//!
//! Hand-off and synchronization engine for the storefront support widget.
//! Routes the customer to the automated assistant or into the staff queue,
//! and keeps the bound conversation in step with the server by polling.

pub mod config;
pub mod error;
pub mod events;
pub mod machine;
pub mod manager;
pub mod poller;
pub mod store;
pub mod structs;
pub mod sync;
pub mod transport;

// Re-exports
pub use config::SupportChatConfig;
pub use error::{Result, SupportChatError};
pub use events::{EventBus, SessionEvent};
pub use machine::{MachineEvent, StateMachine, StateTransition, TransitionError};
pub use manager::SessionManager;
pub use poller::StatusPoller;
pub use store::{MergeCheckpoint, MergeOutcome, MessageStore};
pub use structs::{
    Binding, ChatMode, ChatSession, DeliveryState, Message, MessageKind, SendAck, SessionStatus,
};
pub use sync::{SyncReport, Trigger};
pub use transport::{
    HttpTransport, InMemoryTransport, MessageHold, TransportAdapter, TransportOp, STAFF_SENDER_ID,
};
