//! Scheduling and execution of the item tree.
//!
//! - [`resolver`] turns input locators into values.
//! - [`readiness`] and [`stack`] layer operations into an [`ExecutionStack`].
//! - [`control`] defines the batch/realtime controller protocol.
//! - [`coordinator`] runs a stack with bounded concurrency.
//! - [`host`] is the public surface tying them together.

pub mod catalog;
pub mod control;
pub mod coordinator;
pub mod host;
pub mod readiness;
pub mod resolver;
pub mod stack;

pub use catalog::Catalog;
pub use control::{BatchController, ChannelRealtime, Controller, RealtimeController, RealtimeFeed, ValueBatch};
pub use coordinator::{Coordinator, ExecutionError, OperationFailure, RunOutcome};
pub use host::{StopHandle, Workflow};
pub use resolver::{Resolved, resolve};
pub use stack::{ControlLayer, ExecutionLayer, ExecutionStack, ScheduleError, build_nested, build_stack};
