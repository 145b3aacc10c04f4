//! Managed process data model.
//!
//! ## Contents
//! - [`ProcessSpec`], [`StartOptions`] what to start and how
//! - [`ProcessInfo`], [`WorkerInfo`] descriptors returned to callers and attached to events
//! - [`Status`], [`WorkerStatus`] lifecycle states
//! - [`ProcessId`], [`ExitInfo`]

mod info;
mod spec;

pub use info::{ExitInfo, ProcessId, ProcessInfo, Status, WorkerInfo, WorkerStatus};
pub use spec::{ProcessSpec, StartOptions};
