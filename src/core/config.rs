//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for one supervisor.
//!
//! Config is used in two ways:
//! 1. **Supervisor creation**: `SupervisorBuilder::new(config)`
//! 2. **Per-process policy**: every process actor copies the abort/backoff policies at start
//!
//! ## Sentinel values
//! - `handshake_timeout = 0s` → wait for the `ready` handshake forever
//! - `kill_timeout = 0s` → escalate to SIGKILL immediately after asking

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::{AbortPolicy, BackoffPolicy};

/// Global configuration for the supervisor runtime.
///
/// Defines:
/// - **Shutdown behavior**: grace period for stopping every process
/// - **Filesystem layout**: control socket and snapshot directories
/// - **Default identity**: user/group for processes that don't name one
/// - **Lifecycle policies**: handshake and kill timeouts, abort and backoff policies
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time [`Supervisor::shutdown`](crate::Supervisor::shutdown) waits for
    /// processes to stop before killing them and returning `GraceExceeded`.
    pub grace: Duration,

    /// Directory where managed processes create their control sockets.
    pub rundir: PathBuf,

    /// Directory holding the persisted process list (`processes.json`).
    pub confdir: PathBuf,

    /// Default user for processes started without one (`None` = supervisor's user).
    pub user: Option<String>,

    /// Default group for processes started without one.
    pub group: Option<String>,

    /// How long a new instance may take to connect and send `ready`.
    ///
    /// A process that misses it is killed and its exit counts as a fast failure.
    /// Not applied while a debug process is paused.
    pub handshake_timeout: Duration,

    /// Grace between a stop request and SIGKILL.
    pub kill_timeout: Duration,

    /// When repeated fast failures abort a process.
    pub abort: AbortPolicy,

    /// Delay before an automatic respawn, indexed by consecutive fast failures.
    pub backoff: BackoffPolicy,
}

impl Config {
    /// Returns the handshake timeout as an `Option`.
    ///
    /// - `None` → no timeout
    /// - `Some(d)` → instances that are not ready after `d` are killed
    #[inline]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        if self.handshake_timeout == Duration::ZERO {
            None
        } else {
            Some(self.handshake_timeout)
        }
    }

    /// Location of the persisted process list.
    #[inline]
    pub fn snapshot_path(&self) -> PathBuf {
        self.confdir.join("processes.json")
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - `rundir = $TMPDIR/procvisor/run`, `confdir = $TMPDIR/procvisor/conf`
    /// - `user = group = None` (inherit)
    /// - `handshake_timeout = 10s`, `kill_timeout = 5s`
    /// - `abort = AbortPolicy::default()` (3 fast failures, 1s minimum uptime)
    /// - `backoff = BackoffPolicy::default()` (exponential from 100ms)
    fn default() -> Self {
        let base = std::env::temp_dir().join("procvisor");
        Self {
            grace: Duration::from_secs(30),
            rundir: base.join("run"),
            confdir: base.join("conf"),
            user: None,
            group: None,
            handshake_timeout: Duration::from_secs(10),
            kill_timeout: Duration::from_secs(5),
            abort: AbortPolicy::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_handshake_timeout_means_none() {
        let mut cfg = Config::default();
        assert_eq!(cfg.handshake_timeout(), Some(Duration::from_secs(10)));
        cfg.handshake_timeout = Duration::ZERO;
        assert_eq!(cfg.handshake_timeout(), None);
    }

    #[test]
    fn snapshot_lives_in_confdir() {
        let cfg = Config {
            confdir: PathBuf::from("/etc/pv"),
            ..Config::default()
        };
        assert_eq!(cfg.snapshot_path(), PathBuf::from("/etc/pv/processes.json"));
    }
}
