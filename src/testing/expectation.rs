//! Expectations: deadline-bounded assertions on asynchronous signals.
//!
//! An [`Expectation`] is fulfilled from a callback and awaited with a
//! timeout. A [`ValueExpectation`] resolves when an observed value reaches a
//! target. Both are created per check and resolved exactly once.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::core::observable::{self, ObserveError, Observable};

/// Errors produced when an expectation does not resolve as required.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpectationError {
    /// The signal did not arrive before the deadline.
    #[error("expectation '{description}' was not fulfilled within {timeout:?}")]
    Timeout {
        description: String,
        timeout: Duration,
    },

    /// The signal arrived more often than expected.
    #[error("expectation '{description}' was fulfilled {count} times, expected {expected}")]
    OverFulfilled {
        description: String,
        count: u32,
        expected: u32,
    },

    /// The observed source went away before resolving.
    #[error("expectation '{description}' lost its source before resolving")]
    Closed { description: String },
}

/// A signal that must arrive a set number of times before a deadline.
pub struct Expectation {
    description: String,
    expected: u32,
    count: Arc<Observable<u32>>,
}

/// Cloneable handle that fulfils an [`Expectation`].
#[derive(Clone)]
pub struct Fulfiller {
    count: Arc<Observable<u32>>,
}

impl Fulfiller {
    /// Record one fulfilment. Safe to call from any thread.
    pub fn fulfill(&self) {
        self.count.update(|n| {
            *n += 1;
            Some(())
        });
    }
}

impl Expectation {
    /// An expectation fulfilled exactly once.
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_count(description, 1)
    }

    /// An expectation fulfilled exactly `expected` times.
    pub fn with_count(description: impl Into<String>, expected: u32) -> Self {
        Self {
            description: description.into(),
            expected: expected.max(1),
            count: Arc::new(Observable::new(0)),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn fulfiller(&self) -> Fulfiller {
        Fulfiller {
            count: Arc::clone(&self.count),
        }
    }

    pub fn fulfill(&self) {
        self.fulfiller().fulfill();
    }

    pub fn fulfillment_count(&self) -> u32 {
        self.count.get()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfillment_count() >= self.expected
    }

    /// Wait for the expected number of fulfilments.
    ///
    /// Fails with `OverFulfilled` if the count already exceeds the expected
    /// value when the wait resolves.
    pub async fn wait(&self, timeout: Duration) -> Result<(), ExpectationError> {
        let expected = self.expected;
        let count = self
            .count
            .wait_for(timeout, |n| *n >= expected)
            .await
            .map_err(|e| self.error(e, timeout))?;

        if count > expected {
            return Err(ExpectationError::OverFulfilled {
                description: self.description.clone(),
                count,
                expected,
            });
        }
        Ok(())
    }

    fn error(&self, err: ObserveError, timeout: Duration) -> ExpectationError {
        match err {
            ObserveError::Timeout(_) => ExpectationError::Timeout {
                description: self.description.clone(),
                timeout,
            },
            ObserveError::Closed => ExpectationError::Closed {
                description: self.description.clone(),
            },
        }
    }
}

/// Resolves when an observed value equals a target.
pub struct ValueExpectation<T> {
    description: String,
    rx: watch::Receiver<T>,
    target: T,
}

impl<T> ValueExpectation<T>
where
    T: Clone + PartialEq + Send + Sync,
{
    pub fn new(description: impl Into<String>, rx: watch::Receiver<T>, target: T) -> Self {
        Self {
            description: description.into(),
            rx,
            target,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Wait until the observed value equals the target.
    pub async fn wait(mut self, timeout: Duration) -> Result<T, ExpectationError> {
        let target = self.target.clone();
        observable::wait_for(&mut self.rx, timeout, |v| *v == target)
            .await
            .map_err(|e| match e {
                ObserveError::Timeout(_) => ExpectationError::Timeout {
                    description: self.description.clone(),
                    timeout,
                },
                ObserveError::Closed => ExpectationError::Closed {
                    description: self.description.clone(),
                },
            })
    }
}
