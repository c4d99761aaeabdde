//! Observable state cells.
//!
//! An [`Observable`] holds a value that can be read synchronously and
//! watched asynchronously. Waiters resolve as soon as the value satisfies a
//! predicate, or fail once their deadline passes. Observers never poll.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Errors returned while waiting on an observable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserveError {
    /// The deadline elapsed before the value matched.
    #[error("value did not match within {0:?}")]
    Timeout(Duration),

    /// The owning cell was dropped.
    #[error("observed cell was dropped")]
    Closed,
}

/// A value cell whose changes can be awaited.
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value, returning the previous one.
    pub fn set(&self, value: T) -> T {
        self.tx.send_replace(value)
    }

    /// Atomically inspect and optionally modify the value.
    ///
    /// `f` returns `Some(r)` after modifying the value in place, which
    /// notifies observers, or `None` to leave it untouched.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> Option<R>) -> Option<R> {
        let mut result = None;
        self.tx.send_if_modified(|value| {
            result = f(value);
            result.is_some()
        });
        result
    }

    /// Subscribe to changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Wait until the value satisfies `predicate`.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&T) -> bool,
    ) -> Result<T, ObserveError> {
        let mut rx = self.subscribe();
        wait_for(&mut rx, timeout, predicate).await
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Wait until the value equals `target`.
    pub async fn wait_for_value(&self, target: T, timeout: Duration) -> Result<T, ObserveError> {
        self.wait_for(timeout, |v| *v == target).await
    }
}

impl<T> Default for Observable<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Wait on a receiver until its value satisfies `predicate`.
///
/// The current value is checked first, so a change that happened before the
/// call is not missed.
pub async fn wait_for<T>(
    rx: &mut watch::Receiver<T>,
    timeout: Duration,
    predicate: impl FnMut(&T) -> bool,
) -> Result<T, ObserveError>
where
    T: Clone,
{
    match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
        Ok(Ok(value)) => Ok(value.clone()),
        Ok(Err(_)) => Err(ObserveError::Closed),
        Err(_) => Err(ObserveError::Timeout(timeout)),
    }
}
