//! # procvisor
//!
//! **Procvisor** supervises local OS processes from inside a Tokio application.
//!
//! It starts executables (optionally as a cluster of identical workers), waits
//! for each of them to announce readiness over a per-process control socket,
//! restarts them when they crash, aborts them when they keep crashing before
//! becoming ready, and lets callers talk to them (built-in diagnostics and
//! custom commands) while observing everything through a topic-based event bus.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ ProcessSpec  │   │ ProcessSpec  │   │ ProcessSpec  │
//!     │  (web, x2)   │   │   (worker)   │   │   (cron)     │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor (façade)                                              │
//! │  - Registry (id → actor mailbox, snapshot dump/restore)           │
//! │  - Bus (topic pub/sub)                                            │
//! │  - runtime CancellationToken                                      │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ ProcessActor │   │ ProcessActor │   │ ProcessActor │
//!     │ slot 0, 1    │   │ slot 0       │   │ slot 0       │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘
//!      │ Monitor per OS process: handshake, stdout/stderr, events, exit
//!      ▼                  ▼                  ▼
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐
//!   │ managed  │ ◄──── │ control  │ ────► │ Control  │
//!   │ process  │ unix  │ socket   │ frame │ Session  │ (callers)
//!   │ (Control │ socket│ <id>.<pid>.sock  └──────────┘
//!   │  Server) │       └──────────┘
//!   └──────────┘
//!
//! ProcessActor ── publish(Event) ──► Bus ──► EventStream / Subscribe workers
//! ```
//!
//! ### Lifecycle
//! ```text
//! start_process ──► starting ──(ready handshake)──► ready
//!                     │  └─ debug ──► paused ──(resume)──► starting
//!                     │
//! ready ──(unexpected exit)──► restarting ──(backoff)──► starting ──► ready (process:restarted)
//!   │        └─ N exits before ready ──► aborted (final)
//!   └─(stop / kill)──► stopped ──(restart)──► starting
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Start, stop, restart, resume, scale, remove processes.       | [`Supervisor`], [`ProcessSpec`]             |
//! | **Policies**      | Crash-loop detection and respawn delays.                     | [`AbortPolicy`], [`BackoffPolicy`]          |
//! | **Events**        | `process:*`, `worker:*`, `cluster:*`, `boss:*` topics.       | [`Bus`], [`Event`], [`Subscribe`]           |
//! | **Control**       | Talk to a running process; serve the channel inside one.     | [`ControlSession`], [`ControlServer`]       |
//! | **Errors**        | Typed errors for supervisor operations and control calls.    | [`BossError`], [`ControlError`]             |
//! | **Configuration** | Directories, default identity, grace and timeouts.           | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use procvisor::{Config, ProcessSpec, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = vec![Arc::new(procvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = Vec::new();
//!
//!     let sup = Supervisor::builder(Config::default())
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let web = sup
//!         .start_process(ProcessSpec::new("/usr/local/bin/web").with_instances(2))
//!         .await?;
//!
//!     let session = sup.connect_to_process(web.id.as_str()).await?;
//!     let reply = session.request("custom:status", None).await?;
//!     println!("web says {reply}");
//!
//!     sup.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

pub mod control;
mod core;
mod error;
mod events;
mod policies;
mod process;
mod spawn;
mod subscribers;

// ---- Public re-exports ----

pub use control::{
    ControlHandle, ControlServer, ControlSession, Diagnostics, Endpoint, ExitRequest,
    MemoryReport, Message, SessionIntent,
};
pub use crate::core::{Config, PersistedProcess, Supervisor, SupervisorBuilder};
pub use error::{BossError, ControlError};
pub use events::{Bus, Event, EventKind, EventStream, SubscriptionId, TopicPattern};
pub use policies::{AbortPolicy, BackoffPolicy, ExitClass, JitterPolicy};
pub use process::{
    ExitInfo, ProcessId, ProcessInfo, ProcessSpec, StartOptions, Status, WorkerInfo, WorkerStatus,
};
pub use spawn::{Identity, IdentityResolver, SystemIdentity};
pub use subscribers::Subscribe;

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
