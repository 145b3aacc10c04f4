//! Runtime core: process lifecycle, clustering and orchestration.
//!
//! The only public API from this module is [`Supervisor`] (with its
//! [`SupervisorBuilder`] and [`Config`]); everything else is internal.
//!
//! Internal modules:
//! - [`registry`]: id → actor map, request routing, snapshot dump/restore;
//! - [`actor`]: lifecycle state machine of one process;
//! - [`cluster`]: worker reconciliation and scaling for clustered processes;
//! - [`instance`]: monitor of one spawned OS process (handshake, output, exit);
//! - [`slot`]: per-worker bookkeeping;
//! - [`snapshot`]: persisted process list;
//! - [`shutdown`]: termination signal handling.

mod actor;
mod builder;
mod cluster;
mod config;
mod instance;
mod registry;
mod shutdown;
mod slot;
mod snapshot;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::Config;
pub use snapshot::PersistedProcess;
pub use supervisor::Supervisor;
