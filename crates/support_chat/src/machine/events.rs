//! Machine events - inputs that drive session state transitions

use serde::{Deserialize, Serialize};

use crate::structs::SessionStatus;

/// Defines the events that can trigger state transitions in the FSM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineEvent {
    // ========== User Events ==========
    /// User picked staff mode and a session was bound (reused or quick-created).
    StaffBound { status: SessionStatus },

    /// User switched back to the automated assistant.
    AiSelected,

    /// User closed the widget or left staff mode.
    CloseRequested,

    // ========== Poll Observations ==========
    /// A poll tick reported the bound session's status.
    StatusObserved { status: SessionStatus },

    /// The server merged conversations; the manager moved to another session.
    Rebound { status: SessionStatus },

    /// The bound session was reported closed with nothing to rebind to.
    ClosedByServer,
}

impl MachineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StaffBound { .. } => "staff_bound",
            Self::AiSelected => "ai_selected",
            Self::CloseRequested => "close_requested",
            Self::StatusObserved { .. } => "status_observed",
            Self::Rebound { .. } => "rebound",
            Self::ClosedByServer => "closed_by_server",
        }
    }
}
