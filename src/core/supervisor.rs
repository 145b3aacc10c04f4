//! # Supervisor: public façade of the process manager.
//!
//! The [`Supervisor`] owns the event [`Bus`], the registry of process actors
//! and the runtime cancellation token. Every operation returns the affected
//! [`ProcessInfo`] (or a [`BossError`]) once the requested transition is
//! complete; unexpected exits never surface as errors, only as events.
//!
//! ## High-level architecture
//! ```text
//! caller ──► Supervisor ──► Registry ──► mailbox ──► ProcessActor ──► OS processes
//!                │                                       │
//!                │                                       └─► Bus::publish(process:*, worker:*, cluster:*)
//!                └─► subscribe(pattern) ◄──────────────────────── Bus
//!
//! Shutdown path:
//!   run_until_signal()
//!     └─► wait_for_shutdown_signal()
//!           └─► shutdown():
//!                 ├─ Bus.publish(boss:shutdown)
//!                 ├─ stop every live process, bounded by Config::grace
//!                 │    ├─ Ok         → runtime_token.cancel()
//!                 │    └─ timed out  → runtime_token.cancel() (remaining children killed),
//!                 │                    Err(GraceExceeded{stuck})
//!                 └─ later calls fail with BossError::Closed
//! ```
//!
//! ## Example
//! ```no_run
//! use procvisor::{Config, ProcessSpec, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), procvisor::BossError> {
//!     let sup = Supervisor::new(Config::default());
//!     let mut ready = sup.subscribe("process:ready");
//!
//!     let info = sup
//!         .start_process(ProcessSpec::new("/usr/local/bin/web").with_instances(2))
//!         .await?;
//!     ready.recv().await;
//!     println!("{} is up as pid {:?}", info.name, sup.find_process(info.id.as_str()).await?.pid);
//!
//!     sup.run_until_signal().await
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::control::ControlSession;
use crate::error::BossError;
use crate::events::{Bus, Event, EventKind, EventStream, TopicPattern};
use crate::process::{ProcessInfo, ProcessSpec};

use super::builder::SupervisorBuilder;
use super::config::Config;
use super::registry::Registry;
use super::shutdown;

/// Manages local OS processes: lifecycle, restarts, clustering and control channels.
pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    registry: Arc<Registry>,
    runtime_token: CancellationToken,
}

impl Supervisor {
    /// Builds a supervisor with default identity resolution and no subscribers.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(cfg: Config) -> Arc<Self> {
        SupervisorBuilder::new(cfg).build()
    }

    /// Starts a [`SupervisorBuilder`].
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        registry: Arc<Registry>,
        runtime_token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            bus,
            registry,
            runtime_token,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Event bus carrying every lifecycle and relayed event.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Shorthand for [`Bus::subscribe`].
    pub fn subscribe(&self, pattern: impl Into<TopicPattern>) -> EventStream {
        self.bus.subscribe(pattern)
    }

    /// Spawns a process (or `instances` workers) and returns its descriptor.
    ///
    /// Returns once the OS processes exist; readiness is announced by
    /// `process:ready` (`cluster:online` for clusters). Validation, identity and
    /// spawn failures leave nothing behind.
    pub async fn start_process(&self, spec: ProcessSpec) -> Result<ProcessInfo, BossError> {
        self.registry.start(spec).await
    }

    /// Stops a process and waits until every instance has exited.
    ///
    /// Stopping a stopped or aborted process is a no-op.
    pub async fn stop_process(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.registry.stop(id).await
    }

    /// Replaces the running instance(s) and waits until the replacement is ready.
    ///
    /// A stopped process is started again; an aborted one is rejected.
    pub async fn restart_process(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.registry.restart(id).await
    }

    /// Continues a process started in debug mode.
    pub async fn resume_process(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.registry.resume(id).await
    }

    /// Forgets a stopped or aborted process.
    pub async fn remove_process(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.registry.remove(id).await
    }

    /// Every known process, in start order.
    pub async fn list_processes(&self) -> Vec<ProcessInfo> {
        self.registry.list().await
    }

    pub async fn find_process(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.registry.find(id).await
    }

    /// Opens a control session to a process (its first worker when clustered).
    ///
    /// `kill`/`restart` sent through the session are treated as explicit requests.
    pub async fn connect_to_process(&self, id: &str) -> Result<ControlSession, BossError> {
        self.registry.connect(id).await
    }

    /// Opens a control session to one worker of a process.
    pub async fn connect_to_worker(&self, id: &str, pid: u32) -> Result<ControlSession, BossError> {
        self.registry.connect_worker(id, pid).await
    }

    /// Changes the worker count of a clustered process and waits until it is online again.
    pub async fn set_cluster_workers(&self, id: &str, n: usize) -> Result<ProcessInfo, BossError> {
        self.registry.scale(id, n).await
    }

    /// Persists every live process to `<confdir>/processes.json`.
    pub async fn dump_processes(&self) -> Result<PathBuf, BossError> {
        self.registry.dump().await
    }

    /// Starts every process found in `<confdir>/processes.json`.
    pub async fn restore_processes(&self) -> Result<Vec<ProcessInfo>, BossError> {
        self.registry.restore().await
    }

    /// Stops every live process within [`Config::grace`], then closes the runtime.
    ///
    /// Processes still running when the grace period ends are killed and listed
    /// in [`BossError::GraceExceeded`].
    pub async fn shutdown(&self) -> Result<(), BossError> {
        if self.runtime_token.is_cancelled() {
            return Ok(());
        }
        self.bus.publish(Event::new(EventKind::BossShutdown));
        let live = self.registry.live().await;
        info!(processes = live.len(), grace = ?self.cfg.grace, "shutting down");

        let stops = live.iter().map(|(id, _)| self.registry.stop(id.as_str()));
        let res = tokio::time::timeout(self.cfg.grace, join_all(stops)).await;

        let outcome = match res {
            Ok(_) => Ok(()),
            Err(_) => {
                let stuck: Vec<String> = self
                    .registry
                    .live()
                    .await
                    .into_iter()
                    .map(|(_, name)| name)
                    .collect();
                warn!(?stuck, grace = ?self.cfg.grace, "grace exceeded; killing remaining processes");
                Err(BossError::GraceExceeded {
                    grace: self.cfg.grace,
                    stuck,
                })
            }
        };
        self.runtime_token.cancel();
        outcome
    }

    /// Waits for SIGINT, SIGTERM or SIGQUIT, then runs [`shutdown`](Self::shutdown).
    pub async fn run_until_signal(&self) -> Result<(), BossError> {
        let signal = shutdown::wait_for_shutdown_signal()
            .await
            .map_err(BossError::Signal)?;
        info!(signal, "termination signal received");
        self.shutdown().await
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.runtime_token.cancel();
    }
}
