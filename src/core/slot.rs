//! Per-slot bookkeeping of a [`ProcessActor`](super::actor::ProcessActor).
//!
//! A non-clustered process owns exactly one slot (index 0); a cluster owns one
//! slot per worker. A slot outlives the OS processes it runs: each respawn puts
//! a new [`Instance`] with a fresh generation into the same slot, so messages
//! from a previous instance are recognised and dropped.

use std::path::PathBuf;
use std::time::Instant;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::task::JoinHandle;

use crate::control::ControlSession;
use crate::process::{ExitInfo, WorkerInfo, WorkerStatus};

/// What the slot should do when its current instance exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Intent {
    /// Unexpected exit: classify and restart or abort.
    Run,
    /// Explicit stop: stay down.
    Stop,
    /// Explicit restart: respawn immediately.
    Restart,
    /// Scale-down: leave the cluster.
    Retire,
}

/// One running OS process.
pub(crate) struct Instance {
    pub generation: u64,
    pub pid: u32,
    pub socket: PathBuf,
    pub spawned_at: Instant,
    pub ready: bool,
    pub paused: bool,
    pub session: Option<ControlSession>,
    pub monitor: JoinHandle<()>,
}

impl Instance {
    /// Asks the instance to terminate: `kill` over the control channel when
    /// connected, SIGTERM otherwise.
    pub fn request_stop(&self) {
        let sent = self
            .session
            .as_ref()
            .is_some_and(|s| s.kill().is_ok());
        if !sent {
            self.signal(Signal::SIGTERM);
            if self.paused {
                self.signal(Signal::SIGCONT);
            }
        }
    }

    /// Asks the instance to exit for a restart.
    pub fn request_restart(&self) {
        let sent = self
            .session
            .as_ref()
            .is_some_and(|s| s.restart().is_ok());
        if !sent {
            self.signal(Signal::SIGTERM);
            if self.paused {
                self.signal(Signal::SIGCONT);
            }
        }
    }

    pub fn signal(&self, sig: Signal) {
        send_signal(self.pid, sig);
    }
}

pub(crate) fn send_signal(pid: u32, sig: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), sig) {
        tracing::debug!(pid, signal = ?sig, error = %e, "signal not delivered");
    }
}

pub(crate) struct Slot {
    pub index: usize,
    pub stage: WorkerStatus,
    pub instance: Option<Instance>,
    pub intent: Intent,
    /// Intent set by a caller-held session rather than by the supervisor.
    pub claim: Option<Intent>,
    /// Pid replaced by a session-requested restart of this worker.
    pub restarted_from: Option<u32>,
    pub fast_failures: u32,
    /// Token of the scheduled respawn, if one is pending.
    pub respawn: Option<u64>,
    pub last_pid: Option<u32>,
    pub last_exit: ExitInfo,
}

impl Slot {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            stage: WorkerStatus::Forked,
            instance: None,
            intent: Intent::Run,
            claim: None,
            restarted_from: None,
            fast_failures: 0,
            respawn: None,
            last_pid: None,
            last_exit: ExitInfo::default(),
        }
    }

    /// Sets an intent decided by the supervisor, dropping any session claim.
    pub fn direct(&mut self, intent: Intent) {
        self.intent = intent;
        self.claim = None;
    }

    /// No instance running and none scheduled.
    pub fn is_idle(&self) -> bool {
        self.instance.is_none() && self.respawn.is_none()
    }

    pub fn is_ready(&self) -> bool {
        self.instance.as_ref().is_some_and(|i| i.ready)
    }

    pub fn pid(&self) -> Option<u32> {
        self.instance.as_ref().map(|i| i.pid)
    }

    pub fn worker_info(&self, title: &str) -> WorkerInfo {
        WorkerInfo {
            index: self.index,
            title: title.to_string(),
            pid: self.pid(),
            socket: self.instance.as_ref().map(|i| i.socket.clone()),
            status: self.stage,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(inst) = &self.instance {
            inst.monitor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_is_idle_and_forked() {
        let slot = Slot::new(3);
        assert!(slot.is_idle());
        assert!(!slot.is_ready());
        let info = slot.worker_info("web");
        assert_eq!(info.index, 3);
        assert_eq!(info.status, WorkerStatus::Forked);
        assert_eq!(info.pid, None);
    }

    #[test]
    fn directed_intent_drops_the_session_claim() {
        let mut slot = Slot::new(0);
        slot.intent = Intent::Stop;
        slot.claim = Some(Intent::Stop);
        slot.direct(Intent::Restart);
        assert_eq!(slot.intent, Intent::Restart);
        assert_eq!(slot.claim, None);
    }

    #[test]
    fn pending_respawn_is_not_idle() {
        let mut slot = Slot::new(0);
        slot.respawn = Some(1);
        assert!(!slot.is_idle());
    }
}
