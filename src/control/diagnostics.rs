//! # In-process diagnostics.
//!
//! [`Diagnostics`] is what a managed process runs when it receives the
//! `heapdump` or `gc` command. The server wraps each call with
//! `<op>:start` / `<op>:complete` events.
//!
//! [`MemoryReport`] is the default: it writes the `Vm*`/`Rss*` lines of
//! `/proc/self/status` (when available) as a JSON report into the temp dir.
//! Rust has no tracing collector, so `force_gc` only reports success.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Diagnostic hooks invoked by the control server.
#[async_trait]
pub trait Diagnostics: Send + Sync + 'static {
    /// Writes a heap/memory dump and returns its path.
    async fn dump_heap(&self) -> Result<PathBuf, String>;

    /// Releases reclaimable memory.
    async fn force_gc(&self) -> Result<(), String>;
}

/// Default diagnostics: JSON memory report.
#[derive(Clone, Debug)]
pub struct MemoryReport {
    dir: PathBuf,
}

impl Default for MemoryReport {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }
}

impl MemoryReport {
    /// Writes reports into `dir` instead of the temp dir.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Diagnostics for MemoryReport {
    async fn dump_heap(&self) -> Result<PathBuf, String> {
        let pid = std::process::id();
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut report = Map::new();
        report.insert("pid".into(), Value::from(pid));
        report.insert("takenAtMs".into(), Value::from(millis as u64));
        if let Ok(status) = tokio::fs::read_to_string("/proc/self/status").await {
            for line in status.lines() {
                if let Some((key, value)) = line.split_once(':') {
                    if key.starts_with("Vm") || key.starts_with("Rss") {
                        report.insert(key.to_string(), Value::from(value.trim()));
                    }
                }
            }
        }

        let path = self.dir.join(format!("procvisor-heap-{pid}-{millis}.json"));
        let body = serde_json::to_vec_pretty(&Value::Object(report)).map_err(|e| e.to_string())?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| format!("write {}: {e}", path.display()))?;
        Ok(path)
    }

    async fn force_gc(&self) -> Result<(), String> {
        Ok(())
    }
}
