//! Operation conformance harness.
//!
//! A test case supplies a factory for the operation under test; the
//! [`ConformanceSuite`] runs every [`Guarantee`] against a serial and a
//! concurrent queue and reports what broke.
//!
//! ```ignore
//! struct ChecksumCase;
//!
//! impl OperationTestCase for ChecksumCase {
//!     type Operation = Checksum;
//!
//!     fn suite_name(&self) -> &str {
//!         "checksum"
//!     }
//!
//!     fn operation_under_test(&self) -> Checksum {
//!         Checksum::new(vec![0; 1024])
//!     }
//! }
//!
//! let report = ConformanceSuite::new(ChecksumCase).run_all().await;
//! assert!(report.passed(), "{report}");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use super::expectation::{Expectation, ValueExpectation};
use crate::config::{HarnessConfig, QueueReuse, TimeoutPolicy};
use crate::core::observable::Observable;
use crate::core::operation::{lock, Operation, OperationError};
use crate::core::queue::{Concurrency, QueueError, WorkQueue};
use crate::core::state::OperationState;
use crate::execution::{BlockOperation, OperationQueue};

/// A concrete operation type to run through the harness.
pub trait OperationTestCase: Send + Sync {
    /// The operation type under test.
    type Operation: Operation + 'static;

    /// Identifier used in queue names and reports.
    fn suite_name(&self) -> &str;

    /// Build the operation under test. Must return a new instance on every
    /// call.
    fn operation_under_test(&self) -> Self::Operation;

    /// Deadline for every asynchronous wait.
    fn default_timeout(&self) -> Duration {
        TimeoutPolicy::detect().timeout()
    }
}

/// The two queue shapes every guarantee runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Serial,
    Concurrent,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Serial, QueueKind::Concurrent];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Serial => "serial",
            QueueKind::Concurrent => "concurrent",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A behavioural guarantee the operation must honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guarantee {
    /// The factory yields a genuine, fresh operation.
    TypeConformance,
    /// The completion callback fires once the operation has run.
    Completion,
    /// A declared dependency runs to completion first.
    Dependency,
    /// Bulk cancellation is observable on the operation.
    Cancellation,
}

impl Guarantee {
    pub const ALL: [Guarantee; 4] = [
        Guarantee::TypeConformance,
        Guarantee::Completion,
        Guarantee::Dependency,
        Guarantee::Cancellation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Guarantee::TypeConformance => "type_conformance",
            Guarantee::Completion => "completion",
            Guarantee::Dependency => "dependency",
            Guarantee::Cancellation => "cancellation",
        }
    }
}

impl fmt::Display for Guarantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A violated guarantee.
#[derive(Debug, Error)]
pub enum ConformanceFailure {
    #[error("{suite}: the operation under test is not a fresh operation: {reason}")]
    TypeConformance { suite: String, reason: String },

    #[error(
        "the operation completion callback did not execute within the timeout \
         (queue '{queue}', {timeout:?})"
    )]
    CompletionTimeout { queue: String, timeout: Duration },

    #[error(
        "the operation dependency did not execute within the timeout \
         (queue '{queue}', {timeout:?})"
    )]
    DependencyTimeout { queue: String, timeout: Duration },

    #[error(
        "the operation left the not-started state before its dependency finished \
         (queue '{queue}', observed {observed})"
    )]
    DependencyOrder {
        queue: String,
        observed: OperationState,
    },

    #[error(
        "the operation did not move to the cancelled state within the timeout \
         (queue '{queue}', {timeout:?})"
    )]
    CancellationTimeout { queue: String, timeout: Duration },

    #[error("queue '{queue}' rejected the operation: {source}")]
    Rejected {
        queue: String,
        #[source]
        source: QueueError,
    },

    #[error("the operation rejected its dependency: {0}")]
    DependencyRejected(#[from] OperationError),
}

impl ConformanceFailure {
    /// The guarantee this failure belongs to.
    pub fn guarantee(&self) -> Option<Guarantee> {
        match self {
            ConformanceFailure::TypeConformance { .. } => Some(Guarantee::TypeConformance),
            ConformanceFailure::CompletionTimeout { .. } => Some(Guarantee::Completion),
            ConformanceFailure::DependencyTimeout { .. }
            | ConformanceFailure::DependencyOrder { .. }
            | ConformanceFailure::DependencyRejected(_) => Some(Guarantee::Dependency),
            ConformanceFailure::CancellationTimeout { .. } => Some(Guarantee::Cancellation),
            ConformanceFailure::Rejected { .. } => None,
        }
    }
}

/// Result of one guarantee on one queue kind.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub guarantee: Guarantee,
    pub queue_kind: QueueKind,
    pub queue_name: String,
    pub duration: Duration,
    pub failure: Option<String>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Outcomes of a full suite run.
#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    pub suite: String,
    pub cases: Vec<CaseOutcome>,
}

impl ConformanceReport {
    pub fn passed(&self) -> bool {
        self.cases.iter().all(CaseOutcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.cases.iter().filter(|c| !c.passed())
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failures().count();
        writeln!(
            f,
            "{}: {} passed, {} failed",
            self.suite,
            self.cases.len() - failed,
            failed
        )?;
        for case in &self.cases {
            match &case.failure {
                None => writeln!(
                    f,
                    "  ok    {}::{} ({:?})",
                    case.guarantee, case.queue_kind, case.duration
                )?,
                Some(reason) => writeln!(
                    f,
                    "  FAIL  {}::{}: {}",
                    case.guarantee, case.queue_kind, reason
                )?,
            }
        }
        Ok(())
    }
}

/// One serial and one concurrent queue, created on first use and reused
/// until [`teardown`](SharedQueues::teardown).
///
/// [`checkout`](SharedQueues::checkout) retires a queue that still holds
/// work from an earlier case, so leftovers never run into the next case.
pub struct SharedQueues<Q> {
    prefix: String,
    concurrency: Concurrency,
    serial: Mutex<Option<Arc<Q>>>,
    concurrent: Mutex<Option<Arc<Q>>>,
}

impl<Q: WorkQueue> SharedQueues<Q> {
    pub fn new(prefix: impl Into<String>, concurrency: Concurrency) -> Self {
        Self {
            prefix: prefix.into(),
            concurrency,
            serial: Mutex::new(None),
            concurrent: Mutex::new(None),
        }
    }

    fn slot(&self, kind: QueueKind) -> &Mutex<Option<Arc<Q>>> {
        match kind {
            QueueKind::Serial => &self.serial,
            QueueKind::Concurrent => &self.concurrent,
        }
    }

    fn build(&self, kind: QueueKind) -> Arc<Q> {
        let name = format!("{}.{}", self.prefix, kind);
        Arc::new(match kind {
            QueueKind::Serial => Q::serial(&name),
            QueueKind::Concurrent => Q::with_concurrency(&name, self.concurrency),
        })
    }

    pub fn serial(&self) -> Arc<Q> {
        self.get(QueueKind::Serial)
    }

    pub fn concurrent(&self) -> Arc<Q> {
        self.get(QueueKind::Concurrent)
    }

    /// The shared queue of the given kind, created if needed.
    pub fn get(&self, kind: QueueKind) -> Arc<Q> {
        let mut slot = lock(self.slot(kind));
        Arc::clone(slot.get_or_insert_with(|| self.build(kind)))
    }

    /// The shared queue of the given kind, idle and unpaused.
    ///
    /// A queue still holding operations is cancelled and replaced by a new
    /// one of the same name.
    pub fn checkout(&self, kind: QueueKind) -> Arc<Q> {
        let mut slot = lock(self.slot(kind));
        if let Some(queue) = slot.as_ref() {
            let outstanding = queue.operation_count();
            if outstanding == 0 {
                queue.set_paused(false);
                return Arc::clone(queue);
            }
            debug!(
                queue = queue.name(),
                outstanding, "retiring shared queue that still holds work"
            );
            queue.cancel_all();
            queue.set_paused(false);
        }
        let queue = self.build(kind);
        *slot = Some(Arc::clone(&queue));
        queue
    }

    /// Cancel outstanding work and drop both queues.
    pub fn teardown(&mut self) {
        let queues = [
            lock(&self.serial).take(),
            lock(&self.concurrent).take(),
        ];
        for queue in queues.into_iter().flatten() {
            debug!(queue = queue.name(), "tearing down shared queue");
            queue.cancel_all();
            queue.set_paused(false);
        }
    }
}

/// Runs the conformance guarantees for one test case.
pub struct ConformanceSuite<T, Q = OperationQueue> {
    case: T,
    timeout: Duration,
    reuse: QueueReuse,
    concurrency: Concurrency,
    shared: SharedQueues<Q>,
}

impl<T: OperationTestCase> ConformanceSuite<T> {
    /// A suite running on [`OperationQueue`].
    pub fn new(case: T) -> Self {
        Self::with_queue(case)
    }
}

impl<T, Q> ConformanceSuite<T, Q>
where
    T: OperationTestCase,
    Q: WorkQueue + 'static,
{
    /// A suite running on a custom queue type.
    pub fn with_queue(case: T) -> Self {
        let timeout = case.default_timeout();
        let shared = SharedQueues::new(case.suite_name().to_string(), Concurrency::Unbounded);
        Self {
            case,
            timeout,
            reuse: QueueReuse::Fresh,
            concurrency: Concurrency::Unbounded,
            shared,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_queue_reuse(mut self, reuse: QueueReuse) -> Self {
        self.reuse = reuse;
        self
    }

    /// Apply timeout, queue reuse and concurrent budget from configuration.
    ///
    /// The configured timeout replaces the case's
    /// [`default_timeout`](OperationTestCase::default_timeout). Call
    /// [`with_timeout`](Self::with_timeout) afterwards to override it again.
    pub fn with_config(mut self, config: &HarnessConfig) -> Self {
        self.timeout = config.timeout_policy().timeout();
        self.reuse = config.queue_reuse;
        self.concurrency = config.concurrent_budget();
        self.shared = SharedQueues::new(self.case.suite_name().to_string(), self.concurrency);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn case(&self) -> &T {
        &self.case
    }

    /// A serial queue. The name is diagnostic only.
    pub fn serial_queue(&self, name: &str) -> Q {
        Q::serial(name)
    }

    /// A concurrent queue using the configured budget.
    pub fn concurrent_queue(&self, name: &str) -> Q {
        Q::with_concurrency(name, self.concurrency)
    }

    fn queue_for(&self, guarantee: Guarantee, kind: QueueKind) -> Arc<Q> {
        match self.reuse {
            QueueReuse::Shared => self.shared.checkout(kind),
            QueueReuse::Fresh => {
                let name = format!("{}.{}.{}", self.case.suite_name(), guarantee, kind);
                Arc::new(match kind {
                    QueueKind::Serial => self.serial_queue(&name),
                    QueueKind::Concurrent => self.concurrent_queue(&name),
                })
            }
        }
    }

    fn fresh_operation(&self) -> Arc<T::Operation> {
        Arc::new(self.case.operation_under_test())
    }

    fn enqueue(&self, queue: &Q, operation: Arc<dyn Operation>) -> Result<(), ConformanceFailure> {
        queue
            .add_operation(operation)
            .map_err(|source| ConformanceFailure::Rejected {
                queue: queue.name().to_string(),
                source,
            })
    }

    /// The factory yields a genuine operation in its initial state, and a
    /// new one on every call.
    pub async fn check_type_conformance(&self, _kind: QueueKind) -> Result<(), ConformanceFailure> {
        let failure = |reason: String| ConformanceFailure::TypeConformance {
            suite: self.case.suite_name().to_string(),
            reason,
        };

        let first: Arc<dyn Operation> = self.fresh_operation();
        let second: Arc<dyn Operation> = self.fresh_operation();

        if first.id() == second.id() {
            return Err(failure(format!(
                "two factory calls returned the same operation {}",
                first.id()
            )));
        }
        for op in [&first, &second] {
            if op.state() != OperationState::NotStarted {
                return Err(failure(format!("operation {} is {}", op.id(), op.state())));
            }
            if op.is_cancelled() {
                return Err(failure(format!("operation {} is already cancelled", op.id())));
            }
            if op.core().completion_fired() {
                return Err(failure(format!(
                    "operation {} already fired its completion",
                    op.id()
                )));
            }
            if op.core().is_enqueued() {
                return Err(failure(format!(
                    "operation {} was already submitted to a queue",
                    op.id()
                )));
            }
        }
        Ok(())
    }

    /// Submitted to a paused queue and resumed, the operation fires its
    /// completion callback.
    pub async fn check_completion(&self, kind: QueueKind) -> Result<(), ConformanceFailure> {
        let queue = self.queue_for(Guarantee::Completion, kind);
        let operation = self.fresh_operation();

        let expectation = Expectation::new("completion");
        let fulfiller = expectation.fulfiller();
        operation.set_completion(Box::new(move || fulfiller.fulfill()));

        queue.set_paused(true);
        let enqueued = self.enqueue(&queue, operation);
        queue.set_paused(false);
        enqueued?;

        expectation
            .wait(self.timeout)
            .await
            .map_err(|_| ConformanceFailure::CompletionTimeout {
                queue: queue.name().to_string(),
                timeout: self.timeout,
            })
    }

    /// A trivial dependency submitted after the operation still runs first
    /// and completes.
    pub async fn check_dependency(&self, kind: QueueKind) -> Result<(), ConformanceFailure> {
        let queue = self.queue_for(Guarantee::Dependency, kind);
        let operation = self.fresh_operation();

        // State of the operation under test at the moment the dependency ran.
        let observed = Arc::new(Observable::new(None::<OperationState>));
        let dependent: Weak<T::Operation> = Arc::downgrade(&operation);
        let record = Arc::clone(&observed);
        let dependency = Arc::new(
            BlockOperation::new(move || {
                let state = dependent.upgrade().map(|op| op.state());
                record.set(state);
            })
            .with_name(format!("{}.dependency", self.case.suite_name())),
        );

        let expectation = Expectation::new("dependency");
        let fulfiller = expectation.fulfiller();
        dependency.set_completion(Box::new(move || fulfiller.fulfill()));

        operation.add_dependency(dependency.clone())?;

        queue.set_paused(true);
        let enqueued = self
            .enqueue(&queue, operation)
            .and_then(|()| self.enqueue(&queue, dependency));
        queue.set_paused(false);
        enqueued?;

        if expectation.wait(self.timeout).await.is_err() {
            return Err(ConformanceFailure::DependencyTimeout {
                queue: queue.name().to_string(),
                timeout: self.timeout,
            });
        }

        match observed.get() {
            Some(state) if state != OperationState::NotStarted => {
                Err(ConformanceFailure::DependencyOrder {
                    queue: queue.name().to_string(),
                    observed: state,
                })
            }
            _ => Ok(()),
        }
    }

    /// Bulk-cancelling a paused queue makes the operation's cancellation
    /// flag observably true.
    pub async fn check_cancellation(&self, kind: QueueKind) -> Result<(), ConformanceFailure> {
        let queue = self.queue_for(Guarantee::Cancellation, kind);
        let operation = self.fresh_operation();
        let cancelled = ValueExpectation::new("cancellation", operation.subscribe_cancelled(), true);

        queue.set_paused(true);
        let enqueued = self.enqueue(&queue, operation);
        queue.cancel_all();
        queue.set_paused(false);
        enqueued?;

        cancelled
            .wait(self.timeout)
            .await
            .map(|_| ())
            .map_err(|_| ConformanceFailure::CancellationTimeout {
                queue: queue.name().to_string(),
                timeout: self.timeout,
            })
    }

    /// Run one guarantee against one queue kind.
    pub async fn run_case(
        &self,
        guarantee: Guarantee,
        kind: QueueKind,
    ) -> Result<(), ConformanceFailure> {
        let span = info_span!(
            "conformance_case",
            suite = self.case.suite_name(),
            guarantee = %guarantee,
            queue_kind = %kind,
        );

        async {
            let result = match guarantee {
                Guarantee::TypeConformance => self.check_type_conformance(kind).await,
                Guarantee::Completion => self.check_completion(kind).await,
                Guarantee::Dependency => self.check_dependency(kind).await,
                Guarantee::Cancellation => self.check_cancellation(kind).await,
            };
            match &result {
                Ok(()) => debug!("passed"),
                Err(failure) => warn!(%failure, "failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Run every guarantee against both queue kinds.
    pub async fn run_all(&self) -> ConformanceReport {
        let mut cases = Vec::with_capacity(Guarantee::ALL.len() * QueueKind::ALL.len());

        for guarantee in Guarantee::ALL {
            for kind in QueueKind::ALL {
                let started = Instant::now();
                let result = self.run_case(guarantee, kind).await;
                let queue_name = match self.reuse {
                    QueueReuse::Shared => format!("{}.{}", self.case.suite_name(), kind),
                    QueueReuse::Fresh => {
                        format!("{}.{}.{}", self.case.suite_name(), guarantee, kind)
                    }
                };
                cases.push(CaseOutcome {
                    guarantee,
                    queue_kind: kind,
                    queue_name,
                    duration: started.elapsed(),
                    failure: result.err().map(|f| f.to_string()),
                });
            }
        }

        let report = ConformanceReport {
            suite: self.case.suite_name().to_string(),
            cases,
        };
        info!(
            suite = %report.suite,
            cases = report.cases.len(),
            failed = report.failures().count(),
            "conformance run finished"
        );
        report
    }

    /// Release shared queues, cancelling anything they still hold.
    pub fn teardown(&mut self) {
        self.shared.teardown();
    }
}
