//! Operation lifecycle states.
//!
//! ```text
//! NotStarted ──► Executing ──► Finished
//!     │              │
//!     └──────────────┴──────► Cancelled
//! ```
//!
//! `Finished` and `Cancelled` are terminal: no transition leaves them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Created but not yet picked up by a queue.
    #[default]
    NotStarted,
    /// The operation body is running.
    Executing,
    /// The body ran to completion.
    Finished,
    /// Aborted before finishing.
    Cancelled,
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid state transition: {from} -> {to}")]
pub struct StateError {
    pub from: OperationState,
    pub to: OperationState,
}

impl OperationState {
    /// Whether no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Finished | OperationState::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (NotStarted, Executing)
                | (Executing, Finished)
                | (NotStarted, Cancelled)
                | (Executing, Cancelled)
        )
    }

    /// Validate a transition, returning the new state.
    pub fn transition(self, next: OperationState) -> Result<OperationState, StateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateError {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::NotStarted => "not_started",
            OperationState::Executing => "executing",
            OperationState::Finished => "finished",
            OperationState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
