//! # ProcessActor: lifecycle owner of one managed process.
//!
//! Every mutation of a process goes through its actor's mailbox: caller
//! requests (stop, restart, resume, scale, remove), facts reported by instance
//! monitors (connected, ready, relayed events, exit), timers (respawn after
//! backoff, forced kill) and intents announced by caller-held sessions. The
//! mailbox is the per-id serialization point; distinct processes run in
//! distinct actors and never block one another.
//!
//! ## Architecture
//! ```text
//! Registry ──► Msg::{Stop, Restart, Resume, Scale, Remove} ──┐
//! ControlSession hook ──► Msg::Intent{pid, kill|restart|-} ───┤
//! Monitor(slot, gen) ──► Msg::Instance{Connected|Ready|...} ──┼──► mailbox ──► ProcessActor::handle()
//! backoff timer ──► Msg::Respawn{slot, token} ───────────────┤                   │
//! kill timer ──► Msg::ForceKill{slot, gen} ──────────────────┘                   ├─► slots / ProcessInfo
//!                                                                                 └─► Bus::publish()
//! ```
//!
//! ## Exit classification (one instance)
//! ```text
//! exit ──► slot intent?
//!            ├─ Stop    → stopped, process:exit
//!            ├─ Restart → restarts+1, process:restarting, respawn now
//!            ├─ Retire  → slot removed (cluster scale-down)
//!            └─ Run     → AbortPolicy::classify(ready, uptime)
//!                           ├─ Fast    → fast_failures+1 ─┬─ exhausted → aborted
//!                           └─ Healthy → fast_failures=0 ─┴─ otherwise → restarts+1,
//!                                                                      process:restarting,
//!                                                                      respawn after backoff
//! ```
//!
//! ## Rules
//! - An exit is classified before anything about it is published.
//! - Messages from a replaced instance (older generation) are ignored.
//! - A stale respawn timer (superseded by restart or stop) is ignored via its token.
//! - `aborted` is final: only `remove` is accepted afterwards.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{ControlSession, SessionIntent, socket_path};
use crate::error::BossError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::{AbortPolicy, BackoffPolicy, ExitClass};
use crate::process::{ExitInfo, ProcessId, ProcessInfo, ProcessSpec, Status, WorkerStatus};
use crate::spawn::{Identity, LaunchPlan, Launched, Launcher};

use super::instance::{InstanceEvent, Monitor};
use super::slot::{Instance, Intent, Slot, send_signal};

pub(crate) type Reply = oneshot::Sender<Result<(), BossError>>;

/// Mailbox message of a [`ProcessActor`].
pub(crate) enum Msg {
    Stop { reply: Reply },
    Restart { reply: Reply },
    Resume { reply: Reply },
    Scale { n: usize, reply: Reply },
    Remove { reply: Reply },
    /// `None` withdraws an intent whose command could not be queued.
    Intent {
        pid: u32,
        intent: Option<SessionIntent>,
    },
    Instance {
        slot: usize,
        generation: u64,
        event: InstanceEvent,
    },
    Respawn { slot: usize, token: u64 },
    ForceKill { slot: usize, generation: u64 },
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

/// Everything an actor needs besides its mailbox.
pub(crate) struct ActorParams {
    pub id: ProcessId,
    pub spec: ProcessSpec,
    pub identity: Identity,
    pub launcher: Launcher,
    pub bus: Bus,
    pub abort: AbortPolicy,
    pub backoff: BackoffPolicy,
    pub handshake_timeout: Option<Duration>,
    pub kill_timeout: Duration,
    pub debug_port: Option<u16>,
    /// Restart count carried over from a snapshot.
    pub restarts: u32,
}

pub(crate) struct ProcessActor {
    pub(super) id: ProcessId,
    pub(super) spec: ProcessSpec,
    identity: Identity,
    pub(super) title: String,
    pub(super) clustered: bool,
    pub(super) desired: usize,
    debug_port: Option<u16>,
    pub(super) shared: Arc<RwLock<ProcessInfo>>,
    pub(super) bus: Bus,
    launcher: Launcher,
    pub(super) abort: AbortPolicy,
    pub(super) backoff: BackoffPolicy,
    handshake_timeout: Option<Duration>,
    kill_timeout: Duration,
    tx: mpsc::UnboundedSender<Msg>,

    pub(super) slots: BTreeMap<usize, Slot>,
    pub(super) next_index: usize,
    generation: u64,
    respawn_token: u64,

    pub(super) stop_waiters: Vec<Reply>,
    pub(super) restart_waiters: Vec<Reply>,
    pub(super) scale_waiters: Vec<Reply>,
    pub(super) queued_scales: VecDeque<(usize, Reply)>,

    /// Set while a restart is in flight; holds the pid being replaced.
    pub(super) restart_round: Option<Option<u32>>,
    pub(super) ever_ready: bool,
    pub(super) online: bool,
    pub(super) stopping: bool,
}

impl ProcessActor {
    /// Creates the actor and its shared descriptor. Nothing is spawned yet.
    pub fn new(params: ActorParams, tx: mpsc::UnboundedSender<Msg>) -> Self {
        let ActorParams {
            id,
            spec,
            identity,
            launcher,
            bus,
            abort,
            backoff,
            handshake_timeout,
            kill_timeout,
            debug_port,
            restarts,
        } = params;

        let title = spec.name();
        let desired = spec.options.instances;
        let info = ProcessInfo {
            id: id.clone(),
            name: title.clone(),
            script: spec.script.clone(),
            args: spec.options.args.clone(),
            cwd: spec.options.cwd.clone(),
            status: Status::Starting,
            pid: None,
            socket: None,
            restarts,
            consecutive_fast_failures: 0,
            instances: desired,
            workers: Vec::new(),
            debug: spec.options.debug,
            debug_port,
            user: identity.user.clone(),
            group: identity.group.clone(),
        };

        Self {
            id,
            clustered: spec.is_clustered(),
            spec,
            identity,
            title,
            desired,
            debug_port,
            shared: Arc::new(RwLock::new(info)),
            bus,
            launcher,
            abort,
            backoff,
            handshake_timeout,
            kill_timeout,
            tx,
            slots: BTreeMap::new(),
            next_index: 0,
            generation: 0,
            respawn_token: 0,
            stop_waiters: Vec::new(),
            restart_waiters: Vec::new(),
            scale_waiters: Vec::new(),
            queued_scales: VecDeque::new(),
            restart_round: None,
            ever_ready: false,
            online: false,
            stopping: false,
        }
    }

    /// Descriptor shared with the registry.
    pub fn shared(&self) -> Arc<RwLock<ProcessInfo>> {
        Arc::clone(&self.shared)
    }

    /// Spawns every initial instance. On failure nothing keeps running.
    pub fn boot(&mut self) -> Result<ProcessInfo, BossError> {
        for _ in 0..self.desired {
            let index = self.allocate_index();
            let instance = match self.launch(index) {
                Ok(instance) => instance,
                Err(e) => {
                    // dropping the slots aborts their monitors, which kills the children
                    self.slots.clear();
                    return Err(e);
                }
            };
            let mut slot = Slot::new(index);
            slot.instance = Some(instance);
            self.slots.insert(index, slot);
        }

        self.set_status(self.spawned_status());
        if self.clustered {
            let indices: Vec<usize> = self.slots.keys().copied().collect();
            for index in indices {
                self.advance_worker(index, WorkerStatus::Forked);
            }
        }
        info!(process = %self.id, name = %self.title, instances = self.desired, "started");
        Ok(self.snapshot().as_ref().clone())
    }

    /// Processes the mailbox until the process is removed or the runtime shuts down.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>, token: CancellationToken) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let flow = self.handle(msg);
            self.sync();
            if flow == Flow::Exit {
                break;
            }
        }
        debug!(process = %self.id, "actor finished");
    }

    fn handle(&mut self, msg: Msg) -> Flow {
        match msg {
            Msg::Stop { reply } => self.stop(reply),
            Msg::Restart { reply } => self.restart(reply),
            Msg::Resume { reply } => self.resume(reply),
            Msg::Scale { n, reply } => self.scale(n, reply),
            Msg::Remove { reply } => return self.remove(reply),
            Msg::Intent { pid, intent } => self.on_intent(pid, intent),
            Msg::Instance {
                slot,
                generation,
                event,
            } => self.on_instance(slot, generation, event),
            Msg::Respawn { slot, token } => self.on_respawn(slot, token),
            Msg::ForceKill { slot, generation } => self.on_force_kill(slot, generation),
        }
        Flow::Continue
    }

    // ---------------------------
    // Requests
    // ---------------------------

    fn stop(&mut self, reply: Reply) {
        if self.status().is_terminal() {
            let _ = reply.send(Ok(()));
            return;
        }
        self.stopping = true;
        self.online = false;
        self.stop_waiters.push(reply);

        let mut armed = Vec::new();
        for slot in self.slots.values_mut() {
            if slot.intent != Intent::Retire {
                slot.direct(Intent::Stop);
            }
            slot.respawn = None;
            if let Some(inst) = &slot.instance {
                inst.request_stop();
                armed.push((slot.index, inst.generation));
            }
        }
        self.slots.retain(|_, s| !(s.intent == Intent::Retire && s.is_idle()));
        for (index, generation) in armed {
            self.arm_force_kill(index, generation);
        }
        info!(process = %self.id, "stop requested");
        self.check_stopped(None);
    }

    fn restart(&mut self, reply: Reply) {
        let status = self.status();
        if status == Status::Aborted || self.stopping {
            let _ = reply.send(Err(self.invalid_state("restart")));
            return;
        }
        self.restart_waiters.push(reply);

        if status == Status::Stopped {
            self.restart_from_stopped();
            return;
        }
        if self.clustered {
            self.restart_cluster();
            return;
        }

        let mut armed = None;
        let mut respawn = false;
        if let Some(slot) = self.slots.get_mut(&0) {
            match &slot.instance {
                Some(inst) if slot.intent != Intent::Restart => {
                    inst.request_restart();
                    armed = Some(inst.generation);
                    slot.direct(Intent::Restart);
                }
                Some(_) => {}
                None => {
                    // waiting out a backoff: skip the rest of it
                    slot.respawn = None;
                    respawn = true;
                }
            }
        }
        if let Some(generation) = armed {
            self.arm_force_kill(0, generation);
        }
        if respawn {
            self.start_slot(0);
        }
    }

    /// Brings a stopped process back with fresh slots and a clean failure history.
    fn restart_from_stopped(&mut self) {
        let old_pid = self.slots.values().filter_map(|s| s.last_pid).next_back();
        self.slots.clear();
        self.online = false;
        self.begin_restart_round(old_pid, None);
        if !self.clustered {
            self.slots.insert(0, Slot::new(0));
            self.start_slot(0);
            return;
        }
        for _ in 0..self.desired {
            let index = self.allocate_index();
            self.slots.insert(index, Slot::new(index));
            self.start_slot(index);
        }
    }

    fn resume(&mut self, reply: Reply) {
        if self.status() != Status::Paused {
            let _ = reply.send(Err(self.invalid_state("resume")));
            return;
        }
        for slot in self.slots.values_mut() {
            if let Some(inst) = slot.instance.as_mut() {
                if inst.paused {
                    inst.paused = false;
                    tokio::spawn(continue_when_stopped(inst.pid));
                }
            }
        }
        self.set_status(Status::Starting);
        info!(process = %self.id, "resumed");
        let _ = reply.send(Ok(()));
    }

    fn remove(&mut self, reply: Reply) -> Flow {
        if self.status().is_terminal() {
            let _ = reply.send(Ok(()));
            Flow::Exit
        } else {
            let _ = reply.send(Err(self.invalid_state("remove")));
            Flow::Continue
        }
    }

    /// A caller-held session is about to send `kill` or `restart` to one
    /// instance, or failed to send it after all (`None`).
    ///
    /// Intents decided by the supervisor are never overridden by a session.
    fn on_intent(&mut self, pid: u32, intent: Option<SessionIntent>) {
        let Some(slot) = self.slots.values_mut().find(|s| s.pid() == Some(pid)) else {
            return;
        };
        let Some(intent) = intent else {
            if let Some(claimed) = slot.claim.take() {
                if slot.intent == claimed {
                    slot.intent = Intent::Run;
                }
            }
            debug!(process = %self.id, pid, "session intent withdrawn");
            return;
        };
        if slot.intent != Intent::Run && slot.claim.is_none() {
            return;
        }
        let wanted = match intent {
            SessionIntent::Kill => Intent::Stop,
            SessionIntent::Restart => Intent::Restart,
        };
        slot.intent = wanted;
        slot.claim = Some(wanted);
        debug!(process = %self.id, pid, ?intent, "session intent");
    }

    // ---------------------------
    // Instance facts
    // ---------------------------

    fn on_instance(&mut self, index: usize, generation: u64, event: InstanceEvent) {
        let current = self
            .slots
            .get(&index)
            .and_then(|s| s.instance.as_ref())
            .is_some_and(|i| i.generation == generation);
        if !current {
            return;
        }

        match event {
            InstanceEvent::Connected => {
                if self.clustered {
                    self.worker_connected(index);
                }
            }
            InstanceEvent::Ready { session } => {
                if self.clustered {
                    self.worker_ready(index, session);
                } else {
                    self.process_ready(session);
                }
            }
            InstanceEvent::HandshakeFailed { reason } => {
                warn!(process = %self.id, slot = index, %reason, "handshake failed; killing instance");
            }
            InstanceEvent::Relay { name, payload } => {
                let mut ev = Event::relayed(&name);
                if let Some(payload) = payload {
                    ev = ev.with_payload(payload);
                }
                self.publish_from(index, ev);
            }
            InstanceEvent::Log { level, line } => {
                self.publish_from(index, Event::log(level, line));
            }
            InstanceEvent::Exited { exit } => self.on_exit(index, exit),
        }
    }

    fn process_ready(&mut self, session: ControlSession) {
        let Some(slot) = self.slots.get_mut(&0) else {
            return;
        };
        let Some(inst) = slot.instance.as_mut() else {
            return;
        };
        inst.ready = true;
        inst.paused = false;
        self.title = session.title().to_string();
        inst.session = Some(session);
        slot.stage = WorkerStatus::Ready;
        slot.fast_failures = 0;
        if slot.intent != Intent::Run {
            return;
        }

        self.set_status(Status::Ready);
        self.ever_ready = true;
        match self.restart_round.take() {
            Some(old_pid) => {
                let mut ev = Event::new(EventKind::ProcessRestarted);
                if let Some(pid) = old_pid {
                    ev = ev.with_old_pid(pid);
                }
                self.publish(ev);
            }
            None => self.publish(Event::new(EventKind::ProcessReady)),
        }
        info!(process = %self.id, pid = ?self.slots.get(&0).and_then(Slot::pid), "ready");
        resolve(&mut self.restart_waiters, || Ok(()));
    }

    fn on_exit(&mut self, index: usize, exit: ExitInfo) {
        let Some(slot) = self.slots.get_mut(&index) else {
            return;
        };
        let Some(inst) = slot.instance.take() else {
            return;
        };
        slot.last_pid = Some(inst.pid);
        slot.last_exit = exit;
        slot.stage = WorkerStatus::Stopped;
        let intent = slot.intent;
        let class = self.abort.classify(inst.ready, inst.spawned_at.elapsed());
        debug!(process = %self.id, slot = index, pid = inst.pid, ?exit, ?intent, ?class, "instance exited");

        if self.clustered {
            self.worker_exited(index, intent, class, exit, inst.pid);
        } else {
            self.process_exited(intent, class, exit, inst.pid);
        }
    }

    fn process_exited(&mut self, intent: Intent, class: ExitClass, exit: ExitInfo, pid: u32) {
        match intent {
            Intent::Stop | Intent::Retire => self.check_stopped(Some(exit)),
            Intent::Restart => {
                self.begin_restart_round(Some(pid), Some(exit));
                self.start_slot(0);
            }
            Intent::Run => {
                let Some(fast_failures) = self.count_failure(0, class) else {
                    return;
                };
                if self.abort.is_exhausted(fast_failures) {
                    self.abort_process(
                        exit,
                        format!("{fast_failures} consecutive fast failures"),
                    );
                } else {
                    self.begin_restart_round(Some(pid), Some(exit));
                    self.schedule_respawn(0, self.backoff.after_failures(fast_failures));
                }
            }
        }
    }

    fn on_respawn(&mut self, index: usize, token: u64) {
        let Some(slot) = self.slots.get_mut(&index) else {
            return;
        };
        if slot.respawn != Some(token) {
            return;
        }
        slot.respawn = None;
        self.start_slot(index);
    }

    fn on_force_kill(&mut self, index: usize, generation: u64) {
        let target = self
            .slots
            .get(&index)
            .and_then(|s| s.instance.as_ref())
            .filter(|i| i.generation == generation);
        if let Some(inst) = target {
            warn!(process = %self.id, pid = inst.pid, "did not exit in time; sending SIGKILL");
            inst.signal(Signal::SIGKILL);
        }
    }

    // ---------------------------
    // Spawning
    // ---------------------------

    pub(super) fn allocate_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn launch(&mut self, index: usize) -> Result<Instance, BossError> {
        self.generation += 1;
        let generation = self.generation;
        let debug = self.spec.options.debug;

        let plan = LaunchPlan {
            id: &self.id,
            spec: &self.spec,
            identity: &self.identity,
            title: &self.title,
            worker: self.clustered.then_some(index),
            debug_port: self.debug_port,
        };
        let Launched {
            child,
            pid,
            spawned_at,
        } = self.launcher.launch(&plan)?;

        let socket = socket_path(self.launcher.rundir(), self.id.as_str(), pid);
        let monitor = Monitor {
            slot: index,
            generation,
            child,
            socket: socket.clone(),
            handshake_timeout: if debug { None } else { self.handshake_timeout },
            tx: self.tx.clone(),
        }
        .spawn();

        Ok(Instance {
            generation,
            pid,
            socket,
            spawned_at,
            ready: false,
            paused: debug,
            session: None,
            monitor,
        })
    }

    /// Launches a new instance into an existing slot.
    pub(super) fn start_slot(&mut self, index: usize) {
        match self.launch(index) {
            Ok(instance) => {
                let Some(slot) = self.slots.get_mut(&index) else {
                    return;
                };
                slot.instance = Some(instance);
                slot.direct(Intent::Run);
                if self.clustered {
                    self.advance_worker(index, WorkerStatus::Forked);
                } else {
                    slot.stage = WorkerStatus::Forked;
                    self.set_status(self.spawned_status());
                }
            }
            Err(e) => {
                warn!(process = %self.id, slot = index, error = %e, "respawn failed");
                self.launch_failed(index, e);
            }
        }
    }

    /// A spawn the OS refused counts as a fast failure of the slot.
    fn launch_failed(&mut self, index: usize, err: BossError) {
        let Some(fast_failures) = self.count_failure(index, ExitClass::Fast) else {
            return;
        };
        if !self.abort.is_exhausted(fast_failures) {
            self.schedule_respawn(index, self.backoff.after_failures(fast_failures));
            return;
        }
        let exit = self
            .slots
            .get(&index)
            .map(|s| s.last_exit)
            .unwrap_or_default();
        if self.clustered {
            self.worker_aborted(index, exit);
        } else {
            self.abort_process(exit, err.to_string());
        }
    }

    /// Applies an exit class to a slot's fast-failure counter and returns the new value.
    pub(super) fn count_failure(&mut self, index: usize, class: ExitClass) -> Option<u32> {
        let slot = self.slots.get_mut(&index)?;
        match class {
            ExitClass::Fast => slot.fast_failures += 1,
            ExitClass::Healthy => slot.fast_failures = 0,
        }
        Some(slot.fast_failures)
    }

    pub(super) fn schedule_respawn(&mut self, index: usize, delay: Duration) {
        self.respawn_token += 1;
        let token = self.respawn_token;
        let Some(slot) = self.slots.get_mut(&index) else {
            return;
        };
        slot.respawn = Some(token);
        debug!(process = %self.id, slot = index, ?delay, "respawn scheduled");

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Msg::Respawn { slot: index, token });
        });
    }

    pub(super) fn arm_force_kill(&self, index: usize, generation: u64) {
        let tx = self.tx.clone();
        let delay = self.kill_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Msg::ForceKill {
                slot: index,
                generation,
            });
        });
    }

    // ---------------------------
    // Transitions
    // ---------------------------

    /// Counts a restart, announces it, and remembers the pid being replaced.
    pub(super) fn begin_restart_round(&mut self, old_pid: Option<u32>, exit: Option<ExitInfo>) {
        {
            let mut info = self.shared.write();
            info.restarts += 1;
            info.status = Status::Restarting;
        }
        self.restart_round = Some(old_pid);

        let mut ev = Event::new(EventKind::ProcessRestarting);
        if let Some(pid) = old_pid {
            ev = ev.with_old_pid(pid);
        }
        if let Some(exit) = exit {
            ev = ev.with_exit(exit);
        }
        self.publish(ev);
        info!(process = %self.id, old_pid = ?old_pid, "restarting");
    }

    pub(super) fn abort_process(&mut self, exit: ExitInfo, reason: String) {
        self.set_status(Status::Aborted);
        self.restart_round = None;
        self.online = false;
        self.stopping = false;
        self.publish(
            Event::new(EventKind::ProcessAborted)
                .with_exit(exit)
                .with_reason(reason.clone()),
        );
        warn!(process = %self.id, %reason, "aborted");

        resolve(&mut self.stop_waiters, || Ok(()));
        self.fail_pending();
    }

    /// Finishes a stop once every slot is down for good.
    pub(super) fn check_stopped(&mut self, exit: Option<ExitInfo>) {
        let all_down = self
            .slots
            .values()
            .all(|s| s.is_idle() && s.intent == Intent::Stop);
        let done = if self.slots.is_empty() {
            self.stopping
        } else {
            all_down
        };
        if !done || self.status().is_terminal() {
            return;
        }

        let exit = exit
            .or_else(|| self.slots.values().map(|s| s.last_exit).next_back())
            .unwrap_or_default();
        self.set_status(Status::Stopped);
        self.stopping = false;
        self.online = false;
        self.restart_round = None;
        self.publish(Event::new(EventKind::ProcessExit).with_exit(exit));
        info!(process = %self.id, ?exit, "stopped");

        resolve(&mut self.stop_waiters, || Ok(()));
        self.fail_pending();
    }

    /// Fails restart and scale requests that can no longer complete.
    fn fail_pending(&mut self) {
        let restarts: Vec<_> = self.restart_waiters.drain(..).collect();
        for w in restarts {
            let _ = w.send(Err(self.invalid_state("restart")));
        }
        let scales: Vec<_> = self
            .scale_waiters
            .drain(..)
            .chain(self.queued_scales.drain(..).map(|(_, r)| r))
            .collect();
        for w in scales {
            let _ = w.send(Err(self.invalid_state("scale")));
        }
    }

    // ---------------------------
    // Helpers
    // ---------------------------

    pub(super) fn status(&self) -> Status {
        self.shared.read().status
    }

    pub(super) fn set_status(&self, status: Status) {
        self.shared.write().status = status;
    }

    fn spawned_status(&self) -> Status {
        if self.spec.options.debug {
            Status::Paused
        } else {
            Status::Starting
        }
    }

    pub(super) fn invalid_state(&self, op: &'static str) -> BossError {
        BossError::InvalidState {
            id: self.id.to_string(),
            status: self.status(),
            op,
        }
    }

    /// Recomputes the derived descriptor fields from the slots.
    pub(super) fn sync(&self) {
        let mut info = self.shared.write();
        let active = self.slots.values().find_map(|s| s.instance.as_ref());
        info.pid = active.map(|i| i.pid);
        info.socket = active.map(|i| i.socket.clone());
        info.instances = self.desired;
        info.consecutive_fast_failures = self
            .slots
            .values()
            .map(|s| s.fast_failures)
            .max()
            .unwrap_or(0);
        if self.clustered {
            info.workers = self
                .slots
                .values()
                .map(|s| s.worker_info(&self.title))
                .collect();
        }
    }

    pub(super) fn snapshot(&self) -> Arc<ProcessInfo> {
        self.sync();
        Arc::new(self.shared.read().clone())
    }

    pub(super) fn publish(&self, ev: Event) {
        self.bus.publish(ev.with_process(self.snapshot()));
    }

    /// Publishes an event originating from one instance (worker attached when clustered).
    fn publish_from(&self, index: usize, ev: Event) {
        match self.slots.get(&index).filter(|_| self.clustered) {
            Some(slot) => self.publish(ev.with_worker(slot.worker_info(&self.title))),
            None => self.publish(ev),
        }
    }

    pub(super) fn publish_worker(&self, kind: EventKind, index: usize, exit: Option<(ExitInfo, u32)>) {
        let Some(slot) = self.slots.get(&index) else {
            return;
        };
        let mut worker = slot.worker_info(&self.title);
        let mut ev = Event::new(kind);
        if let Some((exit, pid)) = exit {
            worker.pid = Some(pid);
            ev = ev.with_exit(exit);
        }
        self.publish(ev.with_worker(worker));
    }
}

/// Sends `value()` to every waiter and clears the list.
pub(super) fn resolve(waiters: &mut Vec<Reply>, value: impl Fn() -> Result<(), BossError>) {
    for w in waiters.drain(..) {
        let _ = w.send(value());
    }
}

const STOP_PROBE: Duration = Duration::from_millis(10);
const STOP_PROBE_LIMIT: usize = 200;

/// Sends SIGCONT once the process has reached its suspend point.
///
/// On systems without `/proc` the signal is sent right away.
async fn continue_when_stopped(pid: u32) {
    let stat = format!("/proc/{pid}/stat");
    for _ in 0..STOP_PROBE_LIMIT {
        match tokio::fs::read_to_string(&stat).await {
            Ok(content) if is_stopped(&content) => break,
            Ok(_) => tokio::time::sleep(STOP_PROBE).await,
            Err(_) => break,
        }
    }
    send_signal(pid, Signal::SIGCONT);
}

/// Parses the state field of `/proc/<pid>/stat` (`pid (comm) S ...`).
fn is_stopped(stat: &str) -> bool {
    stat.rfind(')')
        .and_then(|i| stat[i + 1..].split_whitespace().next())
        .is_some_and(|state| state == "T" || state == "t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stopped_state() {
        assert!(is_stopped("123 (fixture) T 1 123 123 0"));
        assert!(is_stopped("123 (odd ) name) t 1"));
        assert!(!is_stopped("123 (fixture) S 1 123"));
        assert!(!is_stopped("garbage"));
    }
}
