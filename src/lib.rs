//! opcheck - conformance checks for cancelable operations and the queues
//! that run them.
//!
//! An [`Operation`] is a unit of work with an observable lifecycle,
//! dependencies, a cancellation flag and a completion callback. A
//! [`WorkQueue`] runs operations under a concurrency budget.
//! [`testing::ConformanceSuite`] verifies that an operation type honours the
//! contract on both serial and concurrent queues.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod testing;

pub use config::{ConfigError, ConfigLoader, HarnessConfig, QueueReuse, TimeoutPolicy};
pub use crate::core::observable::{ObserveError, Observable};
pub use crate::core::operation::{CompletionCallback, Operation, OperationCore, OperationError};
pub use crate::core::queue::{Concurrency, QueueError, WorkQueue};
pub use crate::core::state::{OperationState, StateError};
pub use crate::core::types::{OperationId, QueueName};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{BlockOperation, OperationQueue};
pub use testing::{
    ConformanceFailure, ConformanceReport, ConformanceSuite, Guarantee, OperationTestCase,
    QueueKind,
};
