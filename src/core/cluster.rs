//! # Cluster reconciliation for multi-instance processes.
//!
//! A clustered [`ProcessActor`] runs one slot per worker. Each worker walks
//! `forked → starting → started → ready`, announced as `worker:<stage>` with
//! both the process and the worker descriptor. The process is *online* when
//! exactly `instances` slots exist and every one of them is ready; each
//! transition into that state publishes `cluster:online`.
//!
//! ## Scaling
//! ```text
//! scale(n)
//!   ├─ n == desired and online ──► Ok, nothing happens
//!   ├─ a previous scale is settling ──► queued
//!   ├─ n > active ──► fork new slots (fresh indices)
//!   └─ n < active ──► retire the highest-index slots (kill, remove on exit)
//!        └─► reply once online again
//! ```
//!
//! ## Rules
//! - Fast-failure accounting is per slot; a slot that exhausts it leaves the
//!   cluster (`worker:aborted`). The process aborts only when no slot is left.
//! - A worker crash does not change `instances`.
//! - A worker killed through its own session leaves the cluster; the next
//!   `scale` (or a settling one) forks a replacement up to `instances`.
//! - A worker restarted through its own session announces
//!   `process:restarting` / `process:restarted` with its worker descriptor.
//! - Slot indices are never reused within a process.

use tracing::{info, warn};

use crate::control::ControlSession;
use crate::error::BossError;
use crate::events::{Event, EventKind};
use crate::policies::ExitClass;
use crate::process::{ExitInfo, Status, WorkerStatus};

use super::actor::{ProcessActor, Reply, resolve};
use super::slot::{Intent, Slot};

impl ProcessActor {
    /// Moves a worker to `stage` and announces it as `worker:<stage>`.
    pub(super) fn advance_worker(&mut self, index: usize, stage: WorkerStatus) {
        let Some(slot) = self.slots.get_mut(&index) else {
            return;
        };
        slot.stage = stage;
        self.publish_worker(EventKind::worker_stage(stage), index, None);
    }

    pub(super) fn worker_connected(&mut self, index: usize) {
        let running = self
            .slots
            .get(&index)
            .is_some_and(|s| s.intent == Intent::Run);
        if running {
            self.advance_worker(index, WorkerStatus::Starting);
        }
    }

    pub(super) fn worker_ready(&mut self, index: usize, session: ControlSession) {
        let Some(slot) = self.slots.get_mut(&index) else {
            return;
        };
        let Some(inst) = slot.instance.as_mut() else {
            return;
        };
        inst.ready = true;
        inst.paused = false;
        inst.session = Some(session);
        slot.fast_failures = 0;
        if slot.intent != Intent::Run {
            return;
        }
        let replaced = slot.restarted_from.take();

        self.advance_worker(index, WorkerStatus::Started);
        self.advance_worker(index, WorkerStatus::Ready);
        if let (Some(old_pid), Some(slot)) = (replaced, self.slots.get(&index)) {
            let worker = slot.worker_info(&self.title);
            self.publish(
                Event::new(EventKind::ProcessRestarted)
                    .with_worker(worker)
                    .with_old_pid(old_pid),
            );
        }
        self.check_online();
    }

    pub(super) fn worker_exited(
        &mut self,
        index: usize,
        intent: Intent,
        class: ExitClass,
        exit: ExitInfo,
        pid: u32,
    ) {
        self.publish_worker(EventKind::WorkerExit, index, Some((exit, pid)));
        self.online = false;

        match intent {
            Intent::Retire => {
                self.slots.remove(&index);
                info!(process = %self.id, worker = index, "worker retired");
            }
            Intent::Stop if self.stopping => {}
            Intent::Stop => self.worker_killed(index),
            Intent::Restart => {
                if self.restart_round.is_none() {
                    self.worker_restarting(index, exit, pid);
                }
                self.start_slot(index);
            }
            Intent::Run => {
                let Some(fast_failures) = self.count_failure(index, class) else {
                    return;
                };
                if self.abort.is_exhausted(fast_failures) {
                    self.worker_aborted(index, exit);
                } else {
                    self.shared.write().restarts += 1;
                    warn!(process = %self.id, worker = index, pid, fast_failures, "worker crashed; respawning");
                    self.schedule_respawn(index, self.backoff.after_failures(fast_failures));
                }
            }
        }

        self.check_stopped(Some(exit));
        self.check_online();
    }

    /// A worker stopped through its own session leaves the cluster.
    fn worker_killed(&mut self, index: usize) {
        self.slots.remove(&index);
        info!(process = %self.id, worker = index, "worker stopped by session");

        if self.slots.is_empty() {
            self.stopping = true;
            return;
        }
        // a pending scale or restart still expects `desired` workers
        if !self.scale_waiters.is_empty() || !self.restart_waiters.is_empty() {
            let index = self.allocate_index();
            self.slots.insert(index, Slot::new(index));
            self.start_slot(index);
        }
    }

    /// Counts and announces a session-requested restart of one worker.
    fn worker_restarting(&mut self, index: usize, exit: ExitInfo, pid: u32) {
        self.shared.write().restarts += 1;
        let Some(slot) = self.slots.get_mut(&index) else {
            return;
        };
        slot.restarted_from = Some(pid);
        let mut worker = slot.worker_info(&self.title);
        worker.pid = Some(pid);
        self.publish(
            Event::new(EventKind::ProcessRestarting)
                .with_worker(worker)
                .with_old_pid(pid)
                .with_exit(exit),
        );
        info!(process = %self.id, worker = index, old_pid = pid, "worker restarting");
    }

    /// Drops a slot that exhausted its fast-failure budget.
    pub(super) fn worker_aborted(&mut self, index: usize, exit: ExitInfo) {
        let fast_failures = self.slots.get(&index).map_or(0, |s| s.fast_failures);
        self.publish(
            Event::new(EventKind::WorkerAborted)
                .with_worker(
                    self.slots
                        .get(&index)
                        .map(|s| s.worker_info(&self.title))
                        .unwrap_or_else(|| Slot::new(index).worker_info(&self.title)),
                )
                .with_exit(exit)
                .with_reason(format!("{fast_failures} consecutive fast failures")),
        );
        self.slots.remove(&index);
        warn!(process = %self.id, worker = index, "worker aborted");

        if self.slots.is_empty() {
            self.abort_process(exit, "every worker aborted".to_string());
            return;
        }
        // the desired count is out of reach; don't keep callers waiting for it
        resolve(&mut self.scale_waiters, || Ok(()));
        resolve(&mut self.restart_waiters, || Ok(()));
        if let Some((n, reply)) = self.queued_scales.pop_front() {
            self.scale(n, reply);
        }
    }

    /// Publishes `cluster:online` on each transition into the fully-ready state.
    pub(super) fn check_online(&mut self) {
        if !self.clustered || self.stopping || self.online || self.status().is_terminal() {
            return;
        }
        let settled = self.slots.len() == self.desired
            && self
                .slots
                .values()
                .all(|s| s.is_ready() && s.intent == Intent::Run);
        if !settled {
            return;
        }

        self.online = true;
        let first = !self.ever_ready;
        self.ever_ready = true;
        self.set_status(Status::Ready);
        match self.restart_round.take() {
            Some(old_pid) => {
                let mut ev = Event::new(EventKind::ProcessRestarted);
                if let Some(pid) = old_pid {
                    ev = ev.with_old_pid(pid);
                }
                self.publish(ev);
            }
            None if first => self.publish(Event::new(EventKind::ProcessReady)),
            None => {}
        }
        self.publish(Event::new(EventKind::ClusterOnline));
        info!(process = %self.id, workers = self.desired, "cluster online");

        resolve(&mut self.restart_waiters, || Ok(()));
        resolve(&mut self.scale_waiters, || Ok(()));
        if let Some((n, reply)) = self.queued_scales.pop_front() {
            self.scale(n, reply);
        }
    }

    pub(super) fn scale(&mut self, n: usize, reply: Reply) {
        if !self.clustered {
            let _ = reply.send(Err(BossError::NotClustered {
                id: self.id.to_string(),
            }));
            return;
        }
        if n == 0 {
            let _ = reply.send(Err(BossError::validation("worker count must be at least 1")));
            return;
        }
        if self.status().is_terminal() || self.stopping {
            let _ = reply.send(Err(self.invalid_state("scale")));
            return;
        }
        if !self.scale_waiters.is_empty() {
            self.queued_scales.push_back((n, reply));
            return;
        }
        if n == self.desired && self.online {
            let _ = reply.send(Ok(()));
            return;
        }

        let active: Vec<usize> = self
            .slots
            .iter()
            .filter(|(_, s)| s.intent != Intent::Retire)
            .map(|(i, _)| *i)
            .collect();
        info!(process = %self.id, from = active.len(), to = n, "scaling");
        self.desired = n;
        self.online = false;

        if n > active.len() {
            for _ in active.len()..n {
                let index = self.allocate_index();
                self.slots.insert(index, Slot::new(index));
                self.start_slot(index);
            }
        } else {
            let mut armed = Vec::new();
            for index in active.iter().rev().take(active.len() - n) {
                let Some(slot) = self.slots.get_mut(index) else {
                    continue;
                };
                slot.direct(Intent::Retire);
                slot.respawn = None;
                let running = slot.instance.as_ref().map(|inst| {
                    inst.request_stop();
                    inst.generation
                });
                match running {
                    Some(generation) => armed.push((*index, generation)),
                    None => {
                        self.slots.remove(index);
                    }
                }
            }
            for (index, generation) in armed {
                self.arm_force_kill(index, generation);
            }
        }

        self.scale_waiters.push(reply);
        self.sync();
        self.check_online();
    }

    /// Restarts every worker under one restart round.
    pub(super) fn restart_cluster(&mut self) {
        if self.restart_round.is_none() {
            let old_pid = self.shared.read().pid;
            self.begin_restart_round(old_pid, None);
        }
        self.online = false;

        let mut armed = Vec::new();
        let mut spawn = Vec::new();
        for slot in self.slots.values_mut() {
            if slot.intent == Intent::Retire {
                continue;
            }
            match &slot.instance {
                Some(inst) => {
                    if slot.intent != Intent::Restart {
                        inst.request_restart();
                        armed.push((slot.index, inst.generation));
                        slot.direct(Intent::Restart);
                    }
                }
                None => {
                    slot.respawn = None;
                    spawn.push(slot.index);
                }
            }
        }
        for (index, generation) in armed {
            self.arm_force_kill(index, generation);
        }
        for index in spawn {
            self.start_slot(index);
        }
    }
}
