//! Core types: operation identity, lifecycle state, the operation trait and
//! the queue contract.

pub mod observable;
pub mod operation;
pub mod queue;
pub mod state;
pub mod types;
