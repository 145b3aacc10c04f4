//! # LogWriter: tracing event printer
//!
//! A minimal subscriber that renders incoming [`Event`]s as `tracing` records.
//! Use it for test or demo.
//!
//! ## Example output
//! ```text
//! INFO procvisor: [ready] process="web" id=5f0c.. pid=4242
//! WARN procvisor: [restarting] process="web" old_pid=4242 exit=Some(1)
//! INFO procvisor: [worker:forked] process="web" worker=1 pid=4250
//! INFO procvisor: [cluster:online] process="web" workers=2
//! ERROR procvisor: [aborted] process="crashy" fast_failures=3
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let name = e.process.as_ref().map(|p| p.name.as_str()).unwrap_or("-");
        let id = e.process.as_ref().map(|p| p.id.as_str()).unwrap_or("-");
        let code = e.exit.and_then(|x| x.code);
        let signal = e.exit.and_then(|x| x.signal);

        match e.kind {
            EventKind::ProcessReady => {
                info!(process = name, id, pid = ?e.pid(), "[ready]");
            }
            EventKind::ProcessRestarting => {
                warn!(process = name, old_pid = ?e.old_pid, ?code, ?signal, "[restarting]");
            }
            EventKind::ProcessRestarted => {
                info!(process = name, old_pid = ?e.old_pid, pid = ?e.pid(), "[restarted]");
            }
            EventKind::ProcessExit => {
                info!(process = name, ?code, ?signal, "[exit]");
            }
            EventKind::ProcessAborted => {
                let failures = e.process.as_ref().map(|p| p.consecutive_fast_failures);
                error!(process = name, fast_failures = ?failures, reason = ?e.reason, "[aborted]");
            }
            EventKind::ProcessUncaughtException => {
                error!(process = name, payload = ?e.payload, "[uncaughtexception]");
            }
            EventKind::ProcessLog => {
                let line = e.payload.as_ref().and_then(|p| p.as_str()).unwrap_or_default();
                if e.topic().ends_with(":error") {
                    warn!(process = name, pid = ?e.pid(), "{line}");
                } else {
                    debug!(process = name, pid = ?e.pid(), "{line}");
                }
            }
            EventKind::HeapDumpStart
            | EventKind::HeapDumpComplete
            | EventKind::GcStart
            | EventKind::GcComplete
            | EventKind::ProcessCustom => {
                debug!(process = name, topic = e.topic(), payload = ?e.payload, "[relay]");
            }
            EventKind::WorkerForked
            | EventKind::WorkerStarting
            | EventKind::WorkerStarted
            | EventKind::WorkerReady
            | EventKind::WorkerExit
            | EventKind::WorkerAborted => {
                let worker = e.worker.as_ref().map(|w| w.index);
                info!(process = name, ?worker, pid = ?e.pid(), ?code, "[{}]", e.topic());
            }
            EventKind::ClusterOnline => {
                let workers = e.process.as_ref().map(|p| p.workers.len());
                info!(process = name, ?workers, "[cluster:online]");
            }
            EventKind::BossFatality => {
                error!(process = name, reason = ?e.reason, "[fatality]");
            }
            EventKind::BossShutdown => {
                info!("[shutdown-requested]");
            }
            EventKind::SubscriberPanicked => {
                error!(info = e.reason.as_deref().unwrap_or("unknown"), "[subscriber-panicked]");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
