//! State transitions - FSM transition logic
//!
//! Client-initiated transitions are limited to binding, switching to AI and
//! closing. Everything between `WAITING_STAFF` and `STAFF_CONNECTED` is only
//! ever observed from the server.

use thiserror::Error;

use super::events::MachineEvent;
use crate::structs::SessionStatus;

/// Error type for invalid state transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from} with event {event}")]
    InvalidTransition { from: SessionStatus, event: String },
}

/// Represents a state transition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    /// The state before the transition.
    pub from: SessionStatus,
    /// The state after the transition.
    pub to: SessionStatus,
    /// The event that triggered the transition.
    pub event: MachineEvent,
    /// Whether the state actually changed.
    pub changed: bool,
}

/// State machine for the support session lifecycle.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current_state: SessionStatus,
    history: Vec<StateTransition>,
    max_history: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine in AI mode.
    pub fn new() -> Self {
        Self::with_state(SessionStatus::Ai)
    }

    /// Create a state machine with a specific initial state.
    pub fn with_state(state: SessionStatus) -> Self {
        Self {
            current_state: state,
            history: Vec::new(),
            max_history: 50,
        }
    }

    pub fn state(&self) -> SessionStatus {
        self.current_state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Handle an event and transition to a new state.
    ///
    /// Invalid events leave the state untouched and are not recorded.
    pub fn handle_event(
        &mut self,
        event: MachineEvent,
    ) -> Result<StateTransition, TransitionError> {
        let from = self.current_state;
        let to = Self::compute_next_state(from, &event).ok_or_else(|| {
            TransitionError::InvalidTransition {
                from,
                event: event.name().to_string(),
            }
        })?;

        self.current_state = to;
        let transition = StateTransition {
            from,
            to,
            event,
            changed: from != to,
        };

        if transition.changed {
            tracing::debug!(from = %from, to = %to, "session state transition");
        }

        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        Ok(transition)
    }

    fn compute_next_state(state: SessionStatus, event: &MachineEvent) -> Option<SessionStatus> {
        use MachineEvent::*;
        use SessionStatus::*;

        let staff_state = |s: &SessionStatus| matches!(s, WaitingStaff | StaffConnected);

        match (state, event) {
            // ========== Binding ==========
            (Ai | Closed, StaffBound { status }) if staff_state(status) => Some(*status),

            // ========== Poll Observations ==========
            (WaitingStaff | StaffConnected, StatusObserved { status }) if staff_state(status) => {
                Some(*status)
            }
            (WaitingStaff | StaffConnected, Rebound { status }) if staff_state(status) => {
                Some(*status)
            }
            (WaitingStaff | StaffConnected, ClosedByServer) => Some(Closed),

            // ========== User Actions ==========
            (_, AiSelected) => Some(Ai),
            (_, CloseRequested) => Some(Closed),

            _ => None,
        }
    }

    /// Check if a transition is valid without executing it.
    pub fn can_transition(&self, event: &MachineEvent) -> bool {
        Self::compute_next_state(self.current_state, event).is_some()
    }
}
