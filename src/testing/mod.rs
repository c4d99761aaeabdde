//! Testing utilities for operation authors.
//!
//! This module provides the conformance harness and its building blocks:
//!
//! - [`ConformanceSuite`]: runs every guarantee against serial and
//!   concurrent queues
//! - [`Expectation`] / [`ValueExpectation`]: deadline-bounded waits on
//!   callbacks and observed values
//! - [`DelayOperation`]: an operation that sleeps, returning early when
//!   cancelled
//! - [`operation_conformance_tests!`](crate::operation_conformance_tests):
//!   one `#[tokio::test]` per guarantee and queue kind

mod expectation;
mod harness;
mod macros;

pub use expectation::{Expectation, ExpectationError, Fulfiller, ValueExpectation};
pub use harness::{
    CaseOutcome, ConformanceFailure, ConformanceReport, ConformanceSuite, Guarantee,
    OperationTestCase, QueueKind, SharedQueues,
};

use async_trait::async_trait;
use std::time::Duration;

use crate::core::observable;
use crate::core::operation::{Operation, OperationCore, OperationError};

/// An operation that sleeps for a fixed duration.
///
/// Cancellation interrupts the sleep, so a cancelled delay ends promptly.
///
/// # Example
///
/// ```
/// use opcheck::testing::DelayOperation;
/// use opcheck::{Operation, OperationState};
/// use std::time::Duration;
///
/// # tokio_test_block(async {
/// let op = DelayOperation::new(Duration::from_millis(5));
/// op.start().await;
/// assert_eq!(op.state(), OperationState::Finished);
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct DelayOperation {
    core: OperationCore,
    delay: Duration,
}

impl DelayOperation {
    pub fn new(delay: Duration) -> Self {
        Self {
            core: OperationCore::new("delay"),
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl Operation for DelayOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    async fn main(&self) -> Result<(), OperationError> {
        let mut cancelled = self.subscribe_cancelled();
        // A timeout here means the full delay elapsed without cancellation.
        let _ = observable::wait_for(&mut cancelled, self.delay, |flag| *flag).await;
        Ok(())
    }
}
