//! Lifecycle events and event handling.
//!
//! Queues emit events as operations are enqueued, start, finish or get
//! cancelled, and as the queue itself is paused, resumed or bulk-cancelled.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::state::OperationState;
use crate::core::types::{OperationId, QueueName};

/// Lifecycle events emitted by a queue.
#[derive(Debug, Clone)]
pub enum Event {
    /// An operation was accepted by a queue.
    OperationEnqueued {
        operation_id: OperationId,
        name: String,
        queue: QueueName,
        timestamp: Instant,
    },

    /// An operation's body started running.
    OperationStarted {
        operation_id: OperationId,
        queue: QueueName,
        timestamp: Instant,
    },

    /// An operation reached `Finished`.
    OperationFinished {
        operation_id: OperationId,
        queue: QueueName,
        duration: Duration,
        /// Error returned by the body, if it failed.
        error: Option<String>,
        timestamp: Instant,
    },

    /// An operation reached `Cancelled`.
    OperationCancelled {
        operation_id: OperationId,
        queue: QueueName,
        /// Whether the body had started before cancellation won.
        started: bool,
        timestamp: Instant,
    },

    QueuePaused {
        queue: QueueName,
        timestamp: Instant,
    },

    QueueResumed {
        queue: QueueName,
        timestamp: Instant,
    },

    /// `cancel_all` was invoked.
    QueueCancelledAll {
        queue: QueueName,
        /// Number of operations the queue owned at the time.
        affected: usize,
        timestamp: Instant,
    },

    /// The last outstanding operation reached a terminal state.
    QueueDrained {
        queue: QueueName,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::OperationEnqueued { timestamp, .. } => *timestamp,
            Event::OperationStarted { timestamp, .. } => *timestamp,
            Event::OperationFinished { timestamp, .. } => *timestamp,
            Event::OperationCancelled { timestamp, .. } => *timestamp,
            Event::QueuePaused { timestamp, .. } => *timestamp,
            Event::QueueResumed { timestamp, .. } => *timestamp,
            Event::QueueCancelledAll { timestamp, .. } => *timestamp,
            Event::QueueDrained { timestamp, .. } => *timestamp,
        }
    }

    /// The queue that emitted the event.
    pub fn queue(&self) -> &QueueName {
        match self {
            Event::OperationEnqueued { queue, .. }
            | Event::OperationStarted { queue, .. }
            | Event::OperationFinished { queue, .. }
            | Event::OperationCancelled { queue, .. }
            | Event::QueuePaused { queue, .. }
            | Event::QueueResumed { queue, .. }
            | Event::QueueCancelledAll { queue, .. }
            | Event::QueueDrained { queue, .. } => queue,
        }
    }

    /// The operation the event refers to, if any.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            Event::OperationEnqueued { operation_id, .. }
            | Event::OperationStarted { operation_id, .. }
            | Event::OperationFinished { operation_id, .. }
            | Event::OperationCancelled { operation_id, .. } => Some(*operation_id),
            _ => None,
        }
    }

    pub fn operation_enqueued(operation_id: OperationId, name: &str, queue: QueueName) -> Self {
        Event::OperationEnqueued {
            operation_id,
            name: name.to_string(),
            queue,
            timestamp: Instant::now(),
        }
    }

    pub fn operation_started(operation_id: OperationId, queue: QueueName) -> Self {
        Event::OperationStarted {
            operation_id,
            queue,
            timestamp: Instant::now(),
        }
    }

    /// Build the terminal event matching `state`.
    pub fn operation_terminal(
        operation_id: OperationId,
        queue: QueueName,
        state: OperationState,
        started: bool,
        duration: Duration,
        error: Option<String>,
    ) -> Self {
        match state {
            OperationState::Cancelled => Event::OperationCancelled {
                operation_id,
                queue,
                started,
                timestamp: Instant::now(),
            },
            _ => Event::OperationFinished {
                operation_id,
                queue,
                duration,
                error,
                timestamp: Instant::now(),
            },
        }
    }

    pub fn queue_paused(queue: QueueName, paused: bool) -> Self {
        if paused {
            Event::QueuePaused {
                queue,
                timestamp: Instant::now(),
            }
        } else {
            Event::QueueResumed {
                queue,
                timestamp: Instant::now(),
            }
        }
    }

    pub fn queue_cancelled_all(queue: QueueName, affected: usize) -> Self {
        Event::QueueCancelledAll {
            queue,
            affected,
            timestamp: Instant::now(),
        }
    }

    pub fn queue_drained(queue: QueueName) -> Self {
        Event::QueueDrained {
            queue,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
