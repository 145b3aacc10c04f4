//! Error types used by the procvisor runtime and its control channel.
//!
//! This module defines two main error enums:
//!
//! - [`BossError`]: errors raised by the supervisor itself (start, stop, scaling, persistence).
//! - [`ControlError`]: errors raised by a control channel (framing, handshake, replies).
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging/metrics.
//! Unexpected process exits are **not** errors: they are absorbed by the lifecycle
//! state machine and announced on the event bus.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::process::Status;

/// # Errors produced by the supervisor.
///
/// Returned synchronously to the caller of a supervisor operation. None of them
/// leave partial state behind: a failed start retains nothing in the registry.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BossError {
    /// Start options are malformed or name an unknown user/group.
    #[error("invalid start options: {reason}")]
    Validation {
        /// What was wrong with the request.
        reason: String,
    },

    /// The OS refused to create the process.
    #[error("failed to spawn {script:?}: {source}")]
    Spawn {
        /// Script or executable that was launched.
        script: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// No process with this id is registered.
    #[error("process {id} not found")]
    NotFound {
        /// Requested process id.
        id: String,
    },

    /// The process is known but its control endpoint cannot be reached.
    #[error("process {id} not found or unreachable: {source}")]
    Connection {
        /// Requested process id.
        id: String,
        /// Underlying channel failure.
        #[source]
        source: ControlError,
    },

    /// The operation is not allowed in the current lifecycle state.
    #[error("cannot {op} process {id} while {status}")]
    InvalidState {
        /// Process id.
        id: String,
        /// Current status.
        status: Status,
        /// Rejected operation.
        op: &'static str,
    },

    /// Worker scaling was requested for a process started with a single instance.
    #[error("process {id} is not clustered")]
    NotClustered {
        /// Process id.
        id: String,
    },

    /// Reading or writing the persisted process list failed.
    #[error("snapshot {path:?}: {reason}")]
    Snapshot {
        /// Snapshot file.
        path: PathBuf,
        /// Failure details.
        reason: String,
    },

    /// Shutdown grace period was exceeded; some processes had to be killed.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of processes that did not stop in time.
        stuck: Vec<String>,
    },

    /// Termination signal listeners could not be installed.
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[source] std::io::Error),

    /// The supervisor runtime is shutting down (or the process actor is gone).
    #[error("supervisor runtime closed")]
    Closed,
}

impl BossError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::BossError;
    ///
    /// let err = BossError::NotFound { id: "abc".into() };
    /// assert_eq!(err.as_label(), "boss_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BossError::Validation { .. } => "boss_validation",
            BossError::Spawn { .. } => "boss_spawn",
            BossError::NotFound { .. } => "boss_not_found",
            BossError::Connection { .. } => "boss_connection",
            BossError::InvalidState { .. } => "boss_invalid_state",
            BossError::NotClustered { .. } => "boss_not_clustered",
            BossError::Snapshot { .. } => "boss_snapshot",
            BossError::GraceExceeded { .. } => "boss_grace_exceeded",
            BossError::Signal(_) => "boss_signal",
            BossError::Closed => "boss_closed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            BossError::Validation { reason } => format!("validation: {reason}"),
            BossError::Spawn { script, source } => format!("spawn {}: {source}", script.display()),
            BossError::NotFound { id } => format!("not found: {id}"),
            BossError::Connection { id, source } => format!("unreachable {id}: {source}"),
            BossError::InvalidState { id, status, op } => format!("{op} rejected for {id} ({status})"),
            BossError::NotClustered { id } => format!("not clustered: {id}"),
            BossError::Snapshot { path, reason } => format!("snapshot {}: {reason}", path.display()),
            BossError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck processes={stuck:?}")
            }
            BossError::Signal(e) => format!("signal listener: {e}"),
            BossError::Closed => "runtime closed".to_string(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        BossError::Validation {
            reason: reason.into(),
        }
    }
}

/// # Errors produced by a control channel.
///
/// Surfaced per call on a [`ControlSession`](crate::ControlSession) (or by the
/// [`ControlServer`](crate::ControlServer) while binding). A command issued after
/// the remote side went away fails with [`ControlError::Disconnected`] instead of hanging.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ControlError {
    /// Socket level failure.
    #[error("control channel i/o: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("malformed control message: {0}")]
    Codec(#[from] serde_json::Error),

    /// The peer did not open with a valid `ready` message.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// What went wrong.
        reason: String,
    },

    /// The channel closed (explicit disconnect or process exit).
    #[error("control channel disconnected")]
    Disconnected,

    /// The remote process answered the command with an error.
    #[error("command {command:?} failed remotely: {reason}")]
    Remote {
        /// Command name.
        command: String,
        /// Error text reported by the process.
        reason: String,
    },

    /// Connect or handshake did not complete in time.
    #[error("control channel timed out")]
    Timeout,

    /// The environment does not describe a control endpoint.
    #[error("missing control endpoint variable {var}")]
    Environment {
        /// Missing variable name.
        var: &'static str,
    },
}

impl ControlError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::ControlError;
    ///
    /// assert_eq!(ControlError::Disconnected.as_label(), "control_disconnected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlError::Io(_) => "control_io",
            ControlError::Codec(_) => "control_codec",
            ControlError::Handshake { .. } => "control_handshake",
            ControlError::Disconnected => "control_disconnected",
            ControlError::Remote { .. } => "control_remote",
            ControlError::Timeout => "control_timeout",
            ControlError::Environment { .. } => "control_environment",
        }
    }

    /// Indicates whether the channel itself is gone (as opposed to a single failed command).
    ///
    /// ```
    /// use procvisor::ControlError;
    ///
    /// assert!(ControlError::Disconnected.is_disconnect());
    /// assert!(!ControlError::Remote { command: "x".into(), reason: "y".into() }.is_disconnect());
    /// ```
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ControlError::Disconnected | ControlError::Io(_))
    }
}
