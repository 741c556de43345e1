//! Item tree, scheduling and execution for the paws workflow engine.
//!
//! This crate owns the workflow model (the item tree of operations and their
//! input/output slots), turns it into an execution stack, and runs that stack
//! with bounded concurrency. Persistence, config files and log output live in
//! `paws-infra` and `paws-observe`; nothing here touches the filesystem.

pub mod event;
pub mod operation;
pub mod plugin;
pub mod tree;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
