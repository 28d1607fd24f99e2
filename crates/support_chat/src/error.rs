//! Support chat error types

use thiserror::Error;

use crate::machine::TransitionError;
use crate::structs::SessionStatus;

#[derive(Error, Debug)]
pub enum SupportChatError {
    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Rejected by server: {0}")]
    ServerRejection(String),

    #[error("Cannot send while session is {0}")]
    SendNotPermitted(SessionStatus),

    #[error("No support session is bound")]
    NotBound,

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Superseded by a mode change")]
    Superseded,

    #[error("Connect failed: {0}")]
    ConnectFailed(Box<SupportChatError>),

    #[error("Session {id} was created in status {status}, expected WAITING_STAFF")]
    UnexpectedStatus { id: String, status: SessionStatus },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl SupportChatError {
    /// Errors the next poll tick is expected to recover from.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientNetwork(_) => true,
            Self::ConnectFailed(inner) => inner.is_transient(),
            _ => false,
        }
    }

    pub fn is_authentication(&self) -> bool {
        match self {
            Self::Authentication(_) => true,
            Self::ConnectFailed(inner) => inner.is_authentication(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SupportChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SupportChatError::InvalidResponse(err.to_string())
        } else {
            SupportChatError::TransientNetwork(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, SupportChatError>;
