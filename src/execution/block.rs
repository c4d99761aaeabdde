//! Closure-backed operation.
//!
//! [`BlockOperation`] runs one or more synchronous closures as its body. It
//! is the trivial operation used wherever a test only needs something that
//! runs and completes, such as a dependency that signals when it ran.
//!
//! ```rust
//! use opcheck::{BlockOperation, Operation, OperationState};
//!
//! let op = BlockOperation::new(|| println!("first"))
//!     .with_name("greeter")
//!     .with_block(|| println!("second"));
//!
//! assert_eq!(op.name(), "greeter");
//! assert_eq!(op.block_count(), 2);
//! assert_eq!(op.state(), OperationState::NotStarted);
//! ```
//!
//! Blocks run in insertion order on the queue's worker task. Cancellation is
//! checked between blocks; a block that has begun always runs to the end.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::core::operation::{lock, Operation, OperationCore, OperationError};

type Block = Box<dyn FnOnce() + Send + 'static>;

/// An operation whose body is a list of closures.
pub struct BlockOperation {
    core: OperationCore,
    blocks: Mutex<Vec<Block>>,
}

impl BlockOperation {
    /// Create an operation running `block`.
    pub fn new(block: impl FnOnce() + Send + 'static) -> Self {
        Self {
            core: OperationCore::new("block"),
            blocks: Mutex::new(vec![Box::new(block)]),
        }
    }

    /// Create an operation with no blocks; it finishes as soon as it starts.
    pub fn empty() -> Self {
        Self {
            core: OperationCore::new("block"),
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Builder: set the diagnostic name.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        let blocks = self
            .blocks
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            core: OperationCore::new(name),
            blocks: Mutex::new(blocks),
        }
    }

    /// Builder: append another block.
    pub fn with_block(self, block: impl FnOnce() + Send + 'static) -> Self {
        self.add_block(block);
        self
    }

    /// Append a block. Blocks added after the operation started never run.
    pub fn add_block(&self, block: impl FnOnce() + Send + 'static) {
        lock(&self.blocks).push(Box::new(block));
    }

    /// Number of blocks still waiting to run.
    pub fn block_count(&self) -> usize {
        lock(&self.blocks).len()
    }
}

impl Default for BlockOperation {
    fn default() -> Self {
        Self::empty()
    }
}

#[async_trait]
impl Operation for BlockOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    async fn main(&self) -> Result<(), OperationError> {
        let blocks = std::mem::take(&mut *lock(&self.blocks));
        for block in blocks {
            if self.is_cancelled() {
                break;
            }
            block();
        }
        Ok(())
    }
}
