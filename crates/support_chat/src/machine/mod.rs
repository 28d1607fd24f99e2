//! State machine module
//!
//! Contains the FSM for the support session lifecycle. The state is the
//! session status itself (`AI`, `WAITING_STAFF`, `STAFF_CONNECTED`, `CLOSED`).

mod events;
mod transitions;

pub use events::MachineEvent;
pub use transitions::{StateMachine, StateTransition, TransitionError};
