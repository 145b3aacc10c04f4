//! # Registry: id → process actor.
//!
//! The registry spawns one [`ProcessActor`] per started process and routes
//! caller requests to it. Requests travel through the actor's mailbox and the
//! caller awaits a oneshot reply, so a slow process never blocks the others.
//!
//! ## Architecture
//! ```text
//! Supervisor::start_process(spec)
//!   └─► Registry::start(spec)
//!         ├─ spec.validate()
//!         ├─ IdentityResolver::resolve(user, group)
//!         ├─ ProcessActor::new(..).boot()        (spawns the OS processes)
//!         ├─ entries.insert(id, Entry{tx, shared, ..})
//!         └─ tokio::spawn(actor.run(rx, runtime_token.child_token()))
//!
//! Supervisor::stop_process(id)
//!   └─► Registry::ask(id, Msg::Stop{reply}) ──► mailbox ──► reply.await
//! ```
//!
//! ## Rules
//! - A start that fails validation, identity lookup or spawn retains nothing.
//! - Descriptors are read from the actor's shared [`ProcessInfo`] without a round trip.
//! - A panicking actor is reported as `boss:fatality`; its process stays listed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::control::{ControlSession, IntentHook};
use crate::error::{BossError, ControlError};
use crate::events::{Bus, Event, EventKind};
use crate::process::{ProcessId, ProcessInfo, ProcessSpec};
use crate::spawn::{IdentityResolver, Launcher, pick_free_port};

use super::actor::{ActorParams, Msg, ProcessActor, Reply};
use super::config::Config;
use super::snapshot::{self, PersistedProcess};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running process actor.
struct Entry {
    tx: mpsc::UnboundedSender<Msg>,
    shared: Arc<parking_lot::RwLock<ProcessInfo>>,
    spec: ProcessSpec,
    /// Start order, used to list processes stably.
    order: u64,
}

impl Entry {
    fn info(&self) -> ProcessInfo {
        self.shared.read().clone()
    }
}

pub(crate) struct Registry {
    entries: RwLock<HashMap<ProcessId, Entry>>,
    cfg: Config,
    bus: Bus,
    identity: Arc<dyn IdentityResolver>,
    launcher: Launcher,
    runtime_token: CancellationToken,
    next_order: AtomicU64,
}

impl Registry {
    pub fn new(
        cfg: Config,
        bus: Bus,
        identity: Arc<dyn IdentityResolver>,
        runtime_token: CancellationToken,
    ) -> Arc<Self> {
        let launcher = Launcher::new(cfg.rundir.clone());
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            cfg,
            bus,
            identity,
            launcher,
            runtime_token,
            next_order: AtomicU64::new(0),
        })
    }

    pub async fn start(&self, spec: ProcessSpec) -> Result<ProcessInfo, BossError> {
        self.start_with(spec, 0).await
    }

    /// Starts a process, carrying over a restart count (used by restore).
    async fn start_with(&self, spec: ProcessSpec, restarts: u32) -> Result<ProcessInfo, BossError> {
        if self.runtime_token.is_cancelled() {
            return Err(BossError::Closed);
        }
        spec.validate()?;

        let user = spec.options.user.as_deref().or(self.cfg.user.as_deref());
        let group = spec.options.group.as_deref().or(self.cfg.group.as_deref());
        let identity = self.identity.resolve(user, group)?;
        self.launcher
            .prepare()
            .await
            .map_err(|source| BossError::Spawn {
                script: spec.script.clone(),
                source,
            })?;

        let debug_port = if spec.options.debug {
            pick_free_port()
        } else {
            None
        };

        let id = ProcessId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut actor = ProcessActor::new(
            ActorParams {
                id: id.clone(),
                spec: spec.clone(),
                identity,
                launcher: self.launcher.clone(),
                bus: self.bus.clone(),
                abort: self.cfg.abort,
                backoff: self.cfg.backoff,
                handshake_timeout: self.cfg.handshake_timeout(),
                kill_timeout: self.cfg.kill_timeout,
                debug_port,
                restarts,
            },
            tx.clone(),
        );
        let info = actor.boot()?;
        let shared = actor.shared();

        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        self.entries.write().await.insert(
            id.clone(),
            Entry {
                tx,
                shared: Arc::clone(&shared),
                spec,
                order,
            },
        );

        let bus = self.bus.clone();
        let token = self.runtime_token.child_token();
        tokio::spawn(async move {
            let res = AssertUnwindSafe(actor.run(rx, token)).catch_unwind().await;
            if res.is_err() {
                let info = shared.read().clone();
                error!(process = %info.id, name = %info.name, "process actor panicked");
                bus.publish(
                    Event::new(EventKind::BossFatality)
                        .with_process(Arc::new(info))
                        .with_reason("process actor panicked"),
                );
            }
        });

        Ok(info)
    }

    pub async fn stop(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.ask(id, |reply| Msg::Stop { reply }).await?;
        self.find(id).await
    }

    pub async fn restart(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.ask(id, |reply| Msg::Restart { reply }).await?;
        self.find(id).await
    }

    pub async fn resume(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.ask(id, |reply| Msg::Resume { reply }).await?;
        self.find(id).await
    }

    pub async fn scale(&self, id: &str, n: usize) -> Result<ProcessInfo, BossError> {
        self.ask(id, |reply| Msg::Scale { n, reply }).await?;
        self.find(id).await
    }

    /// Forgets a stopped or aborted process and returns its last descriptor.
    pub async fn remove(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.ask(id, |reply| Msg::Remove { reply }).await?;
        let entry = self
            .entries
            .write()
            .await
            .remove(id)
            .ok_or_else(|| not_found(id))?;
        let info = entry.info();
        info!(process = %info.id, name = %info.name, "removed");
        Ok(info)
    }

    pub async fn find(&self, id: &str) -> Result<ProcessInfo, BossError> {
        self.entries
            .read()
            .await
            .get(id)
            .map(Entry::info)
            .ok_or_else(|| not_found(id))
    }

    /// Every registered process, in start order.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let entries = self.entries.read().await;
        let mut all: Vec<(u64, ProcessInfo)> =
            entries.values().map(|e| (e.order, e.info())).collect();
        all.sort_unstable_by_key(|(order, _)| *order);
        all.into_iter().map(|(_, info)| info).collect()
    }

    /// Opens a control session to the active instance (first worker for clusters).
    pub async fn connect(&self, id: &str) -> Result<ControlSession, BossError> {
        self.connect_at(id, None).await
    }

    /// Opens a control session to the worker currently running as `pid`.
    pub async fn connect_worker(&self, id: &str, pid: u32) -> Result<ControlSession, BossError> {
        self.connect_at(id, Some(pid)).await
    }

    async fn connect_at(&self, id: &str, pid: Option<u32>) -> Result<ControlSession, BossError> {
        let (tx, info) = {
            let entries = self.entries.read().await;
            let entry = entries.get(id).ok_or_else(|| not_found(id))?;
            (entry.tx.clone(), entry.info())
        };
        let unreachable = |source: ControlError| BossError::Connection {
            id: id.to_string(),
            source,
        };

        let socket: Option<PathBuf> = match pid {
            None => info.socket.clone(),
            Some(pid) if info.pid == Some(pid) && info.workers.is_empty() => info.socket.clone(),
            Some(pid) => info.worker_by_pid(pid).and_then(|w| w.socket.clone()),
        };
        let socket = socket
            .filter(|_| !info.status.is_terminal())
            .ok_or_else(|| unreachable(ControlError::Disconnected))?;

        let session = ControlSession::connect(&socket, CONNECT_TIMEOUT)
            .await
            .map_err(unreachable)?;

        // kill/restart issued through this session must not look like a crash
        let remote = session.pid();
        let hook: IntentHook = Arc::new(move |intent| {
            let _ = tx.send(Msg::Intent {
                pid: remote,
                intent,
            });
        });
        session.set_intent_hook(hook);
        Ok(session)
    }

    /// Writes every live process to the snapshot file.
    pub async fn dump(&self) -> Result<PathBuf, BossError> {
        let path = self.cfg.snapshot_path();
        let records: Vec<PersistedProcess> = {
            let entries = self.entries.read().await;
            let mut live: Vec<(u64, PersistedProcess)> = entries
                .values()
                .filter_map(|e| {
                    let info = e.shared.read();
                    (!info.status.is_terminal())
                        .then(|| (e.order, PersistedProcess::new(&e.spec, info.restarts)))
                })
                .collect();
            live.sort_unstable_by_key(|(order, _)| *order);
            live.into_iter().map(|(_, p)| p).collect()
        };
        snapshot::write(&path, &records).await?;
        info!(path = %path.display(), processes = records.len(), "process list saved");
        Ok(path)
    }

    /// Starts every process in the snapshot file; individual failures are logged and skipped.
    pub async fn restore(&self) -> Result<Vec<ProcessInfo>, BossError> {
        let path = self.cfg.snapshot_path();
        let records = snapshot::read(&path).await?;
        let mut started = Vec::with_capacity(records.len());
        for record in records {
            let (spec, restarts) = record.into_spec();
            let script = spec.script.clone();
            match self.start_with(spec, restarts).await {
                Ok(info) => started.push(info),
                Err(e) => {
                    warn!(script = %script.display(), error = %e, "could not restore process");
                }
            }
        }
        info!(path = %path.display(), processes = started.len(), "process list restored");
        Ok(started)
    }

    /// Ids and names of processes not yet stopped or aborted.
    pub async fn live(&self) -> Vec<(ProcessId, String)> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|(id, e)| {
                let info = e.shared.read();
                (!info.status.is_terminal()).then(|| (id.clone(), info.name.clone()))
            })
            .collect()
    }

    async fn ask(&self, id: &str, make: impl FnOnce(Reply) -> Msg) -> Result<(), BossError> {
        let tx = self
            .entries
            .read()
            .await
            .get(id)
            .map(|e| e.tx.clone())
            .ok_or_else(|| not_found(id))?;
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply)).map_err(|_| BossError::Closed)?;
        rx.await.map_err(|_| BossError::Closed)?
    }
}

fn not_found(id: &str) -> BossError {
    BossError::NotFound { id: id.to_string() }
}
