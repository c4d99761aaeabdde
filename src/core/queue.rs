//! Work queue trait and error types.
//!
//! A [`WorkQueue`] accepts operations and runs them once their dependencies
//! are terminal, within a concurrency budget, behind a pause gate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::operation::Operation;
use super::state::OperationState;
use super::types::OperationId;

/// Errors that can occur when submitting to or waiting on a queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The operation was already submitted to a queue.
    #[error("operation {0} was already submitted to a queue")]
    AlreadyEnqueued(OperationId),

    /// Only operations that have not started can be submitted.
    #[error("operation {id} is {state} and cannot be enqueued")]
    NotPending {
        id: OperationId,
        state: OperationState,
    },

    /// The queue needs a Tokio runtime to dispatch work.
    #[error("no Tokio runtime available to drive queue '{0}'")]
    NoRuntime(String),

    /// Waiting for the queue to drain exceeded the deadline.
    #[error("queue '{queue}' did not drain within {timeout:?} ({remaining} outstanding)")]
    Timeout {
        queue: String,
        timeout: Duration,
        remaining: usize,
    },
}

/// How many operations a queue may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// One at a time, in submission order modulo dependencies.
    Serial,
    /// Up to the given number at once.
    Limited(usize),
    /// No limit.
    #[default]
    Unbounded,
}

impl Concurrency {
    /// A budget of `n`; anything at or below one is serial.
    pub fn limited(n: usize) -> Self {
        if n <= 1 {
            Concurrency::Serial
        } else {
            Concurrency::Limited(n)
        }
    }

    /// Maximum number of concurrently running operations, `None` if unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self {
            Concurrency::Serial => Some(1),
            Concurrency::Limited(n) => Some((*n).max(1)),
            Concurrency::Unbounded => None,
        }
    }

    pub fn is_serial(&self) -> bool {
        self.limit() == Some(1)
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit() {
            Some(n) => write!(f, "{}", n),
            None => f.write_str("unbounded"),
        }
    }
}

/// A scheduler for operations.
///
/// Implementations must guarantee:
/// - while paused, no submitted operation begins executing;
/// - an operation never starts before all its dependencies are terminal,
///   whatever the submission order;
/// - no more than [`Concurrency::limit`] operations run at once;
/// - [`cancel_all`](WorkQueue::cancel_all) makes every owned operation's
///   cancellation flag observably true.
pub trait WorkQueue: Send + Sync {
    /// Create a queue. The name is diagnostic only.
    fn with_concurrency(name: &str, concurrency: Concurrency) -> Self
    where
        Self: Sized;

    /// A queue running one operation at a time.
    fn serial(name: &str) -> Self
    where
        Self: Sized,
    {
        Self::with_concurrency(name, Concurrency::Serial)
    }

    /// A queue with no concurrency limit.
    fn concurrent(name: &str) -> Self
    where
        Self: Sized,
    {
        Self::with_concurrency(name, Concurrency::Unbounded)
    }

    fn name(&self) -> &str;

    fn concurrency(&self) -> Concurrency;

    /// Open or close the dispatch gate.
    fn set_paused(&self, paused: bool);

    fn is_paused(&self) -> bool;

    /// Submit an operation. An operation can be submitted once, to one queue.
    fn add_operation(&self, operation: Arc<dyn Operation>) -> Result<(), QueueError>;

    /// Cancel every operation the queue currently owns.
    fn cancel_all(&self);

    /// Number of submitted operations not yet terminal.
    fn operation_count(&self) -> usize;
}
