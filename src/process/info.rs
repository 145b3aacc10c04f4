//! # Process descriptors.
//!
//! [`ProcessInfo`] is the snapshot of one managed process handed to callers,
//! attached to every lifecycle event and persisted (in reduced form) by the
//! snapshot writer. [`WorkerInfo`] describes one OS process of a cluster.
//!
//! ## Lifecycle
//! ```text
//! starting ──► ready ──► restarting ──► starting ...
//!    │           ├─────► stopped   (explicit kill)
//!    │           └─────► aborted   (fast-failure budget exhausted)
//!    └─► paused ──► ready          (debug start, resumed)
//! ```
//!
//! ## Rules
//! - `stopped` and `aborted` are terminal; `aborted` is never left again.
//! - `pid`/`socket` are cleared once a terminal status is reached.

use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a managed process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Allocates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrows the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ProcessId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle status of a managed process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Spawned, waiting for the `ready` handshake.
    Starting,
    /// Spawned in debug mode and suspended until resumed.
    Paused,
    /// Handshake received (for clusters: every worker ready).
    Ready,
    /// Stopped on request. Terminal.
    Stopped,
    /// Previous instance exited; a replacement is scheduled or starting.
    Restarting,
    /// Fast-failure budget exhausted. Terminal, never restarted automatically.
    Aborted,
}

impl Status {
    /// `stopped` or `aborted`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Stopped | Status::Aborted)
    }

    /// Returns the lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Starting => "starting",
            Status::Paused => "paused",
            Status::Ready => "ready",
            Status::Stopped => "stopped",
            Status::Restarting => "restarting",
            Status::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduced lifecycle of one cluster worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// OS process spawned.
    Forked,
    /// Control socket connected.
    Starting,
    /// `ready` handshake received.
    Started,
    /// Accepted into the cluster.
    Ready,
    /// Exited and not coming back.
    Stopped,
}

impl WorkerStatus {
    /// Topic suffix used for `worker:<stage>` events.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Forked => "forked",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Started => "started",
            WorkerStatus::Ready => "ready",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of one worker of a clustered process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    /// Stable worker slot index (never reused within a process).
    pub index: usize,
    /// Title shared by all siblings (reported in the handshake).
    pub title: String,
    /// OS pid of the current worker process.
    pub pid: Option<u32>,
    /// Control endpoint of this worker.
    pub socket: Option<PathBuf>,
    /// Worker stage.
    pub status: WorkerStatus,
}

/// OS level exit details of one instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, when killed by one.
    pub signal: Option<i32>,
}

/// Descriptor of one managed process.
///
/// Returned by every supervisor operation and carried by lifecycle events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub name: String,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub status: Status,
    /// Pid of the active OS process (first worker for clusters).
    pub pid: Option<u32>,
    /// Control endpoint of the active OS process (first worker for clusters).
    pub socket: Option<PathBuf>,
    /// Restarts since creation. Monotonic.
    pub restarts: u32,
    /// Exits before reaching `ready` since the last `ready`.
    pub consecutive_fast_failures: u32,
    /// Desired worker count (`1` = not clustered).
    pub instances: usize,
    /// Worker descriptors (empty unless clustered).
    pub workers: Vec<WorkerInfo>,
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl ProcessInfo {
    /// `true` when the process runs more than one worker.
    pub fn is_clustered(&self) -> bool {
        !self.workers.is_empty() || self.instances > 1
    }

    /// Finds a worker by its current pid.
    pub fn worker_by_pid(&self, pid: u32) -> Option<&WorkerInfo> {
        self.workers.iter().find(|w| w.pid == Some(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Status::Restarting).unwrap();
        assert_eq!(json, "\"restarting\"");
        assert!(Status::Aborted.is_terminal());
        assert!(Status::Stopped.is_terminal());
        assert!(!Status::Paused.is_terminal());
    }

    #[test]
    fn descriptor_uses_camel_case_fields() {
        let info = ProcessInfo {
            id: ProcessId::from("abc"),
            name: "web".into(),
            script: PathBuf::from("/bin/web"),
            args: vec![],
            cwd: None,
            status: Status::Ready,
            pid: Some(42),
            socket: Some(PathBuf::from("/tmp/abc.42.sock")),
            restarts: 1,
            consecutive_fast_failures: 0,
            instances: 1,
            workers: vec![],
            debug: false,
            debug_port: None,
            user: None,
            group: None,
        };
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["id"], "abc");
        assert_eq!(v["consecutiveFastFailures"], 0);
        assert_eq!(v["status"], "ready");
        assert!(v.get("debugPort").is_none());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = ProcessId::generate();
        let b = ProcessId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }
}
