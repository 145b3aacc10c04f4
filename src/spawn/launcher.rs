//! # Launcher: turns a [`ProcessSpec`] into a running OS process.
//!
//! The child gets the spec's arguments, working directory and environment,
//! the resolved [`Identity`], and the `PROCVISOR_*` variables that tell its
//! [`ControlServer`](crate::ControlServer) where to bind.
//!
//! ## Rules
//! - stdin is closed; stdout/stderr are piped so they can be relayed as log events.
//! - The child is killed if its handle is dropped (supervisor teardown).
//! - A spawn the OS refuses maps to [`BossError::Spawn`]; nothing is retained.
//! - The socket directory is created once per start, off the actor, by [`Launcher::prepare`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::control::env;
use crate::error::BossError;
use crate::process::{ProcessId, ProcessSpec};
use crate::spawn::Identity;

/// Per-launch parameters that vary between instances of one process.
#[derive(Clone, Debug)]
pub struct LaunchPlan<'a> {
    pub id: &'a ProcessId,
    pub spec: &'a ProcessSpec,
    pub identity: &'a Identity,
    pub title: &'a str,
    pub worker: Option<usize>,
    pub debug_port: Option<u16>,
}

/// A freshly spawned OS process.
#[derive(Debug)]
pub struct Launched {
    pub child: Child,
    pub pid: u32,
    pub spawned_at: Instant,
}

/// Spawns managed processes whose control sockets live in `rundir`.
#[derive(Clone, Debug)]
pub struct Launcher {
    rundir: PathBuf,
}

impl Launcher {
    pub fn new(rundir: impl Into<PathBuf>) -> Self {
        Self {
            rundir: rundir.into(),
        }
    }

    /// Directory handed to children as their socket directory.
    pub fn rundir(&self) -> &Path {
        &self.rundir
    }

    /// Creates the socket directory.
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.rundir).await
    }

    /// Spawns one OS process for `plan`.
    pub fn launch(&self, plan: &LaunchPlan<'_>) -> Result<Launched, BossError> {
        let spec = plan.spec;
        let spawn_err = |source: std::io::Error| BossError::Spawn {
            script: spec.script.clone(),
            source,
        };

        let mut cmd = Command::new(&spec.script);
        cmd.args(&spec.options.args)
            .envs(&spec.options.env)
            .env(env::ID, plan.id.as_str())
            .env(env::SOCKET_DIR, &self.rundir)
            .env(env::TITLE, plan.title)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &spec.options.cwd {
            cmd.current_dir(cwd);
        }
        if spec.options.debug {
            cmd.env(env::DEBUG, "1");
        }
        if let Some(port) = plan.debug_port {
            cmd.env(env::DEBUG_PORT, port.to_string());
        }
        if let Some(index) = plan.worker {
            cmd.env(env::WORKER, index.to_string());
        }
        if let Some(gid) = plan.identity.gid {
            cmd.gid(gid);
        }
        if let Some(uid) = plan.identity.uid {
            cmd.uid(uid);
        }

        let child = cmd.spawn().map_err(spawn_err)?;
        let pid = child.id().ok_or_else(|| {
            spawn_err(std::io::Error::other("child exited before reporting a pid"))
        })?;

        debug!(process = %plan.id, pid, worker = ?plan.worker, script = %spec.script.display(), "spawned");
        Ok(Launched {
            child,
            pid,
            spawned_at: Instant::now(),
        })
    }
}

/// Picks a local TCP port that is free right now, for a debugger.
///
/// The temporary listener is dropped before returning, so the port is not held:
/// another program may bind it before the child does.
pub fn pick_free_port() -> Option<u16> {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .ok()
}
