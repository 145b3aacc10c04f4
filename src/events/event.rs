//! # Lifecycle events published by the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Process events**: lifecycle of a managed process (`process:ready`, `process:exit`, ...)
//! - **Relayed events**: emitted by the managed process itself over its control channel
//!   (`process:heapdump:start`, `process:log:info`, ...)
//! - **Cluster events**: worker stages and `cluster:online`
//! - **Supervisor events**: `boss:fatality`, `boss:shutdown`, subscriber panics
//!
//! The [`Event`] struct carries the topic string subscribers match against plus
//! the descriptors (process, worker) and details (old pid, exit status, payload).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Events about one process are published from its actor only, so they are FIFO per process.
//!
//! ## Example
//! ```rust
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ProcessRestarting)
//!     .with_old_pid(4242)
//!     .with_reason("exit code 1");
//!
//! assert_eq!(ev.topic(), "process:restarting");
//! assert_eq!(ev.old_pid, Some(4242));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use serde_json::Value;

use crate::process::{ExitInfo, ProcessInfo, WorkerInfo, WorkerStatus};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of published events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Process lifecycle ===
    /// Handshake received; the process is ready.
    ///
    /// Sets: `process`
    ProcessReady,

    /// The active instance exited and a replacement is about to start.
    ///
    /// Sets: `process`, `old_pid`, `exit` (absent for cluster-wide restarts)
    ProcessRestarting,

    /// The replacement instance completed its handshake.
    ///
    /// Sets: `process` (new pid), `old_pid` (failed/replaced pid)
    ProcessRestarted,

    /// The process stopped on request.
    ///
    /// Sets: `process`, `exit`
    ProcessExit,

    /// Fast-failure budget exhausted; no further automatic restarts.
    ///
    /// Sets: `process`, `exit`, `reason`
    ProcessAborted,

    // === Relayed from the managed process ===
    /// The managed process reported an uncaught panic.
    ProcessUncaughtException,
    /// A log line (`process:log:<level>`), from stdout/stderr or the control channel.
    ProcessLog,
    HeapDumpStart,
    HeapDumpComplete,
    GcStart,
    GcComplete,
    /// Any other application event, published as `process:<name>`.
    ProcessCustom,

    // === Cluster ===
    /// Worker stage transition (`worker:forked|starting|started|ready`).
    ///
    /// Sets: `process`, `worker`
    WorkerForked,
    WorkerStarting,
    WorkerStarted,
    WorkerReady,
    /// A worker OS process exited.
    ///
    /// Sets: `process`, `worker`, `exit`
    WorkerExit,
    /// A worker exhausted its fast-failure budget and left the cluster.
    WorkerAborted,
    /// Every desired worker is ready.
    ///
    /// Sets: `process`
    ClusterOnline,

    // === Supervisor ===
    /// Unrecoverable host-level error.
    ///
    /// Sets: `reason`, optionally `process`
    BossFatality,
    /// Supervisor shutdown started.
    BossShutdown,
    /// A subscriber handler panicked.
    ///
    /// Sets: `reason` (`subscriber=<name> info=<panic>`)
    SubscriberPanicked,
}

impl EventKind {
    /// Canonical topic of this kind.
    ///
    /// Relayed kinds return their family prefix; the concrete topic lives on [`Event::topic`].
    pub fn topic(self) -> &'static str {
        match self {
            EventKind::ProcessReady => "process:ready",
            EventKind::ProcessRestarting => "process:restarting",
            EventKind::ProcessRestarted => "process:restarted",
            EventKind::ProcessExit => "process:exit",
            EventKind::ProcessAborted => "process:aborted",
            EventKind::ProcessUncaughtException => "process:uncaughtexception",
            EventKind::ProcessLog => "process:log",
            EventKind::HeapDumpStart => "process:heapdump:start",
            EventKind::HeapDumpComplete => "process:heapdump:complete",
            EventKind::GcStart => "process:gc:start",
            EventKind::GcComplete => "process:gc:complete",
            EventKind::ProcessCustom => "process",
            EventKind::WorkerForked => "worker:forked",
            EventKind::WorkerStarting => "worker:starting",
            EventKind::WorkerStarted => "worker:started",
            EventKind::WorkerReady => "worker:ready",
            EventKind::WorkerExit => "worker:exit",
            EventKind::WorkerAborted => "worker:aborted",
            EventKind::ClusterOnline => "cluster:online",
            EventKind::BossFatality => "boss:fatality",
            EventKind::BossShutdown => "boss:shutdown",
            EventKind::SubscriberPanicked => "boss:subscriber:panicked",
        }
    }

    /// Classifies an event name received from a managed process.
    pub fn relayed(name: &str) -> Self {
        match name {
            "uncaughtexception" => EventKind::ProcessUncaughtException,
            "heapdump:start" => EventKind::HeapDumpStart,
            "heapdump:complete" => EventKind::HeapDumpComplete,
            "gc:start" => EventKind::GcStart,
            "gc:complete" => EventKind::GcComplete,
            n if n.starts_with("log:") => EventKind::ProcessLog,
            _ => EventKind::ProcessCustom,
        }
    }

    /// Kind announcing a worker reaching `stage`.
    pub fn worker_stage(stage: WorkerStatus) -> Self {
        match stage {
            WorkerStatus::Forked => EventKind::WorkerForked,
            WorkerStatus::Starting => EventKind::WorkerStarting,
            WorkerStatus::Started => EventKind::WorkerStarted,
            WorkerStatus::Ready => EventKind::WorkerReady,
            WorkerStatus::Stopped => EventKind::WorkerExit,
        }
    }
}

/// Published event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Full topic string subscribers match against.
    topic: Arc<str>,
    /// Process descriptor at publish time.
    pub process: Option<Arc<ProcessInfo>>,
    /// Worker descriptor (cluster events).
    pub worker: Option<Arc<WorkerInfo>>,
    /// Pid of the replaced instance (`process:restarting`, `process:restarted`).
    pub old_pid: Option<u32>,
    /// OS exit status.
    pub exit: Option<ExitInfo>,
    /// Human-readable reason (errors, panic info, etc.).
    pub reason: Option<Arc<str>>,
    /// Payload relayed from the managed process.
    pub payload: Option<Value>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self::with_topic(kind, Arc::from(kind.topic()))
    }

    /// Creates an event for a name relayed from a managed process (`process:<name>`).
    pub fn relayed(name: &str) -> Self {
        Self::with_topic(EventKind::relayed(name), Arc::from(format!("process:{name}")))
    }

    /// Creates a `process:log:<level>` event.
    pub fn log(level: &str, line: impl Into<String>) -> Self {
        Self::relayed(&format!("log:{level}")).with_payload(Value::String(line.into()))
    }

    fn with_topic(kind: EventKind, topic: Arc<str>) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            topic,
            process: None,
            worker: None,
            old_pid: None,
            exit: None,
            reason: None,
            payload: None,
        }
    }

    /// Topic string (`process:ready`, `process:log:info`, ...).
    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Attaches a process descriptor.
    #[inline]
    pub fn with_process(mut self, info: Arc<ProcessInfo>) -> Self {
        self.process = Some(info);
        self
    }

    /// Attaches a worker descriptor.
    #[inline]
    pub fn with_worker(mut self, worker: WorkerInfo) -> Self {
        self.worker = Some(Arc::new(worker));
        self
    }

    /// Attaches the pid of the replaced instance.
    #[inline]
    pub fn with_old_pid(mut self, pid: u32) -> Self {
        self.old_pid = Some(pid);
        self
    }

    /// Attaches OS exit details.
    #[inline]
    pub fn with_exit(mut self, exit: ExitInfo) -> Self {
        self.exit = Some(exit);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a relayed payload.
    #[inline]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }

    /// Pid of the process the event is about (worker pid first).
    pub fn pid(&self) -> Option<u32> {
        self.worker
            .as_ref()
            .and_then(|w| w.pid)
            .or_else(|| self.process.as_ref().and_then(|p| p.pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relayed_names_map_to_process_topics() {
        let ev = Event::relayed("heapdump:start");
        assert_eq!(ev.kind, EventKind::HeapDumpStart);
        assert_eq!(ev.topic(), "process:heapdump:start");

        let ev = Event::log("warn", "disk almost full");
        assert_eq!(ev.kind, EventKind::ProcessLog);
        assert_eq!(ev.topic(), "process:log:warn");
        assert_eq!(ev.payload, Some(Value::String("disk almost full".into())));

        let ev = Event::relayed("custom:thing");
        assert_eq!(ev.kind, EventKind::ProcessCustom);
        assert_eq!(ev.topic(), "process:custom:thing");
    }

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::BossShutdown);
        let b = Event::new(EventKind::BossShutdown);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn worker_stage_topics() {
        assert_eq!(
            EventKind::worker_stage(WorkerStatus::Started).topic(),
            "worker:started"
        );
        assert_eq!(EventKind::worker_stage(WorkerStatus::Forked).topic(), "worker:forked");
    }
}
