//! Common test utilities shared across integration tests.
//!
//! Besides well-behaved test cases this holds deliberately broken operations
//! and queues, so the harness can be checked for catching each violation.

#![allow(dead_code)]

use async_trait::async_trait;
use opcheck::testing::DelayOperation;
use opcheck::{
    BlockOperation, Concurrency, Operation, OperationCore, OperationError, OperationTestCase,
    QueueError, WorkQueue,
};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Short deadline for cases that are expected to time out.
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(150);

pub struct BlockCase;

impl OperationTestCase for BlockCase {
    type Operation = BlockOperation;

    fn suite_name(&self) -> &str {
        "block"
    }

    fn operation_under_test(&self) -> BlockOperation {
        BlockOperation::empty()
    }
}

pub struct DelayCase;

impl OperationTestCase for DelayCase {
    type Operation = DelayOperation;

    fn suite_name(&self) -> &str {
        "delay"
    }

    fn operation_under_test(&self) -> DelayOperation {
        DelayOperation::new(Duration::from_millis(25))
    }
}

/// Processes a fixed number of steps, checking for cancellation between
/// each one.
pub struct StepOperation {
    core: OperationCore,
    steps: u32,
    completed: Mutex<u32>,
}

impl StepOperation {
    pub fn new(steps: u32) -> Self {
        Self {
            core: OperationCore::new("steps"),
            steps,
            completed: Mutex::new(0),
        }
    }

    pub fn completed(&self) -> u32 {
        *self.completed.lock().unwrap()
    }
}

#[async_trait]
impl Operation for StepOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    async fn main(&self) -> Result<(), OperationError> {
        for _ in 0..self.steps {
            if self.is_cancelled() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            *self.completed.lock().unwrap() += 1;
        }
        Ok(())
    }
}

pub struct StepCase;

impl OperationTestCase for StepCase {
    type Operation = StepOperation;

    fn suite_name(&self) -> &str {
        "steps"
    }

    fn operation_under_test(&self) -> StepOperation {
        StepOperation::new(5)
    }
}

/// Swallows cancellation requests.
pub struct DeafOperation {
    core: OperationCore,
}

#[async_trait]
impl Operation for DeafOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    async fn main(&self) -> Result<(), OperationError> {
        Ok(())
    }

    fn cancel(&self) {}
}

pub struct DeafCase;

impl OperationTestCase for DeafCase {
    type Operation = DeafOperation;

    fn suite_name(&self) -> &str {
        "deaf"
    }

    fn operation_under_test(&self) -> DeafOperation {
        DeafOperation {
            core: OperationCore::new("deaf"),
        }
    }

    fn default_timeout(&self) -> Duration {
        SHORT_TIMEOUT
    }
}

/// Never returns from its body.
pub struct HangingOperation {
    core: OperationCore,
}

#[async_trait]
impl Operation for HangingOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    async fn main(&self) -> Result<(), OperationError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

pub struct HangingCase;

impl OperationTestCase for HangingCase {
    type Operation = HangingOperation;

    fn suite_name(&self) -> &str {
        "hanging"
    }

    fn operation_under_test(&self) -> HangingOperation {
        HangingOperation {
            core: OperationCore::new("hanging"),
        }
    }

    fn default_timeout(&self) -> Duration {
        SHORT_TIMEOUT
    }
}

/// Every instance shares one lifecycle core.
pub struct SharedCoreOperation;

fn shared_core() -> &'static OperationCore {
    static CORE: OnceLock<OperationCore> = OnceLock::new();
    CORE.get_or_init(|| OperationCore::new("shared"))
}

#[async_trait]
impl Operation for SharedCoreOperation {
    fn core(&self) -> &OperationCore {
        shared_core()
    }

    async fn main(&self) -> Result<(), OperationError> {
        Ok(())
    }
}

pub struct SharedCoreCase;

impl OperationTestCase for SharedCoreCase {
    type Operation = SharedCoreOperation;

    fn suite_name(&self) -> &str {
        "shared_core"
    }

    fn operation_under_test(&self) -> SharedCoreOperation {
        SharedCoreOperation
    }

    fn default_timeout(&self) -> Duration {
        SHORT_TIMEOUT
    }
}

/// Runs operations strictly in submission order, ignoring dependencies.
pub struct FifoQueue {
    name: String,
    concurrency: Concurrency,
    paused: Mutex<bool>,
    pending: Mutex<Vec<Arc<dyn Operation>>>,
}

impl FifoQueue {
    fn drain(&self) {
        let ops: Vec<Arc<dyn Operation>> = self.pending.lock().unwrap().drain(..).collect();
        if ops.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for op in ops {
                op.start().await;
            }
        });
    }
}

impl WorkQueue for FifoQueue {
    fn with_concurrency(name: &str, concurrency: Concurrency) -> Self {
        Self {
            name: name.to_string(),
            concurrency,
            paused: Mutex::new(false),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    fn set_paused(&self, paused: bool) {
        *self.paused.lock().unwrap() = paused;
        if !paused {
            self.drain();
        }
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap()
    }

    fn add_operation(&self, operation: Arc<dyn Operation>) -> Result<(), QueueError> {
        if !operation.core().mark_enqueued() {
            return Err(QueueError::AlreadyEnqueued(operation.id()));
        }
        self.pending.lock().unwrap().push(operation);
        if !self.is_paused() {
            self.drain();
        }
        Ok(())
    }

    fn cancel_all(&self) {
        for op in self.pending.lock().unwrap().iter() {
            op.cancel();
        }
    }

    fn operation_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
