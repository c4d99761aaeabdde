//! Operation execution.
//!
//! This module provides the reference queue that runs operations and the
//! closure-backed [`BlockOperation`].

mod block;
mod queue;

pub use block::BlockOperation;
pub use queue::OperationQueue;
