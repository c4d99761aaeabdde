//! Operation trait and lifecycle plumbing.
//!
//! An [`Operation`] is a single cancelable unit of work. Implementors hold an
//! [`OperationCore`] and provide the work itself in [`Operation::main`]; the
//! default trait methods take care of lifecycle state, cancellation,
//! dependencies and the completion callback.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::observable::{ObserveError, Observable};
use super::state::{OperationState, StateError};
use super::types::OperationId;

/// Callback invoked once the operation reaches a terminal state.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Errors that can occur when configuring or running an operation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// An operation was made to depend on itself.
    #[error("operation {0} cannot depend on itself")]
    SelfDependency(OperationId),

    /// The new edge would close a cycle in the dependency graph.
    #[error("dependency {dependency} of operation {operation} would create a cycle")]
    DependencyCycle {
        operation: OperationId,
        dependency: OperationId,
    },

    /// Dependencies can only be added before the operation starts.
    #[error("operation {id} is {state}; dependencies must be added before it starts")]
    AlreadyStarted {
        id: OperationId,
        state: OperationState,
    },

    /// The operation body failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Waiting for the operation exceeded the deadline.
    #[error("operation did not finish within {0:?}")]
    Timeout(Duration),

    /// Invalid lifecycle transition.
    #[error(transparent)]
    State(#[from] StateError),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Default)]
struct CompletionSlot {
    callback: Option<CompletionCallback>,
    fired: bool,
}

/// Shared lifecycle state embedded in every operation.
pub struct OperationCore {
    id: OperationId,
    name: String,
    state: Observable<OperationState>,
    cancelled: Observable<bool>,
    dependencies: Mutex<Vec<Arc<dyn Operation>>>,
    completion: Mutex<CompletionSlot>,
    enqueued: AtomicBool,
    last_error: Mutex<Option<String>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OperationCore {
    /// Create the core for a new operation.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: OperationId::new(),
            name: name.into(),
            state: Observable::new(OperationState::NotStarted),
            cancelled: Observable::new(false),
            dependencies: Mutex::new(Vec::new()),
            completion: Mutex::new(CompletionSlot::default()),
            enqueued: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OperationState {
        self.state.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    pub fn state_cell(&self) -> &Observable<OperationState> {
        &self.state
    }

    pub fn cancelled_cell(&self) -> &Observable<bool> {
        &self.cancelled
    }

    /// Set the cancellation flag. Ignored once the operation is terminal.
    ///
    /// Returns `true` if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.cancelled
            .update(|flag| {
                if *flag {
                    None
                } else {
                    *flag = true;
                    Some(())
                }
            })
            .is_some()
    }

    /// Move to `next`, firing the completion callback on entry to a
    /// terminal state. Returns the previous state.
    pub fn transition(&self, next: OperationState) -> Result<OperationState, StateError> {
        let mut error = None;
        let previous = self.state.update(|state| match state.transition(next) {
            Ok(new_state) => {
                let previous = *state;
                *state = new_state;
                Some(previous)
            }
            Err(e) => {
                error = Some(e);
                None
            }
        });

        match (previous, error) {
            (Some(previous), _) => {
                debug!(operation = %self.id, from = %previous, to = %next, "state transition");
                if next.is_terminal() {
                    self.fire_completion();
                }
                Ok(previous)
            }
            (None, Some(e)) => Err(e),
            (None, None) => Err(StateError {
                from: self.state(),
                to: next,
            }),
        }
    }

    /// Install the completion callback, replacing any pending one.
    ///
    /// Returns `false` if the callback already fired; the new callback is
    /// dropped in that case.
    pub fn set_completion(&self, callback: CompletionCallback) -> bool {
        let mut slot = lock(&self.completion);
        if slot.fired {
            return false;
        }
        slot.callback = Some(callback);
        true
    }

    /// Whether the completion callback slot has been consumed.
    pub fn completion_fired(&self) -> bool {
        lock(&self.completion).fired
    }

    fn fire_completion(&self) {
        let callback = {
            let mut slot = lock(&self.completion);
            if slot.fired {
                return;
            }
            slot.fired = true;
            slot.callback.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Claim the operation for a queue. Succeeds only once.
    pub fn mark_enqueued(&self) -> bool {
        !self.enqueued.swap(true, Ordering::SeqCst)
    }

    pub fn is_enqueued(&self) -> bool {
        self.enqueued.load(Ordering::SeqCst)
    }

    pub fn record_error(&self, message: impl Into<String>) {
        *lock(&self.last_error) = Some(message.into());
    }

    /// Error returned by the most recent run of the body, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    fn dependencies(&self) -> Vec<Arc<dyn Operation>> {
        lock(&self.dependencies).clone()
    }

    fn push_dependency(&self, dependency: Arc<dyn Operation>) {
        let mut deps = lock(&self.dependencies);
        if !deps.iter().any(|d| d.id() == dependency.id()) {
            deps.push(dependency);
        }
    }

    fn remove_dependency(&self, id: OperationId) -> bool {
        let mut deps = lock(&self.dependencies);
        let before = deps.len();
        deps.retain(|d| d.id() != id);
        deps.len() != before
    }
}

impl std::fmt::Debug for OperationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .field("dependencies", &lock(&self.dependencies).len())
            .finish()
    }
}

/// Whether `target` is reachable from `start` along dependency edges.
fn reaches(start: &Arc<dyn Operation>, target: OperationId) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([Arc::clone(start)]);

    while let Some(op) = queue.pop_front() {
        if op.id() == target {
            return true;
        }
        if !visited.insert(op.id()) {
            continue;
        }
        queue.extend(op.dependencies());
    }

    false
}

/// A cancelable unit of work.
///
/// # Example
///
/// ```ignore
/// use opcheck::{Operation, OperationCore, OperationError};
/// use async_trait::async_trait;
///
/// struct Checksum {
///     core: OperationCore,
///     data: Vec<u8>,
/// }
///
/// #[async_trait]
/// impl Operation for Checksum {
///     fn core(&self) -> &OperationCore {
///         &self.core
///     }
///
///     async fn main(&self) -> Result<(), OperationError> {
///         for chunk in self.data.chunks(4096) {
///             if self.is_cancelled() {
///                 return Ok(());
///             }
///             // ...
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Operation: Send + Sync {
    /// Lifecycle plumbing for this operation.
    fn core(&self) -> &OperationCore;

    /// The work itself. Long-running bodies should check
    /// [`is_cancelled`](Operation::is_cancelled) and return early.
    async fn main(&self) -> Result<(), OperationError>;

    fn id(&self) -> OperationId {
        self.core().id()
    }

    /// Diagnostic name.
    fn name(&self) -> &str {
        self.core().name()
    }

    fn state(&self) -> OperationState {
        self.core().state()
    }

    fn is_cancelled(&self) -> bool {
        self.core().is_cancelled()
    }

    fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    fn subscribe_state(&self) -> watch::Receiver<OperationState> {
        self.core().state_cell().subscribe()
    }

    fn subscribe_cancelled(&self) -> watch::Receiver<bool> {
        self.core().cancelled_cell().subscribe()
    }

    /// Request cancellation. Best effort: a running body keeps going until it
    /// observes the flag.
    fn cancel(&self) {
        if self.core().cancel() {
            debug!(operation = %self.id(), name = self.name(), "cancelled");
        }
    }

    /// Declare that this operation must not start before `dependency`
    /// reaches a terminal state.
    fn add_dependency(&self, dependency: Arc<dyn Operation>) -> Result<(), OperationError> {
        let core = self.core();
        let state = core.state();
        if state != OperationState::NotStarted {
            return Err(OperationError::AlreadyStarted { id: core.id(), state });
        }
        if dependency.id() == core.id() {
            return Err(OperationError::SelfDependency(core.id()));
        }
        if reaches(&dependency, core.id()) {
            return Err(OperationError::DependencyCycle {
                operation: core.id(),
                dependency: dependency.id(),
            });
        }
        core.push_dependency(dependency);
        Ok(())
    }

    /// Drop the edge to the dependency with the given id.
    fn remove_dependency(&self, id: OperationId) -> bool {
        self.core().remove_dependency(id)
    }

    fn dependencies(&self) -> Vec<Arc<dyn Operation>> {
        self.core().dependencies()
    }

    /// Whether every dependency has reached a terminal state.
    fn is_ready(&self) -> bool {
        self.dependencies().iter().all(|dep| dep.is_finished())
    }

    fn set_completion(&self, callback: CompletionCallback) {
        if !self.core().set_completion(callback) {
            debug!(operation = %self.id(), "completion already fired, callback dropped");
        }
    }

    /// Run the operation. Called by the queue once it is ready.
    ///
    /// A cancelled operation moves straight to `Cancelled` without running
    /// its body. Otherwise the body runs, and the operation ends
    /// `Cancelled` if cancellation arrived meanwhile, `Finished` if not.
    async fn start(&self) {
        let core = self.core();

        if core.is_cancelled() {
            if let Err(e) = core.transition(OperationState::Cancelled) {
                debug!(operation = %core.id(), error = %e, "start ignored");
            }
            return;
        }

        if let Err(e) = core.transition(OperationState::Executing) {
            debug!(operation = %core.id(), error = %e, "start ignored");
            return;
        }

        if let Err(e) = self.main().await {
            warn!(operation = %core.id(), name = core.name(), error = %e, "operation body failed");
            core.record_error(e.to_string());
        }

        let next = if core.is_cancelled() {
            OperationState::Cancelled
        } else {
            OperationState::Finished
        };
        if let Err(e) = core.transition(next) {
            warn!(operation = %core.id(), error = %e, "could not finish operation");
        }
    }

    /// Wait until the operation reaches a terminal state.
    async fn wait_until_finished(&self, timeout: Duration) -> Result<OperationState, OperationError> {
        self.core()
            .state_cell()
            .wait_for(timeout, |s| s.is_terminal())
            .await
            .map_err(|e| match e {
                ObserveError::Timeout(t) => OperationError::Timeout(t),
                ObserveError::Closed => OperationError::ExecutionFailed(e.to_string()),
            })
    }
}
