//! # Persisted process list.
//!
//! `dump` writes one [`PersistedProcess`] per live process to
//! `<confdir>/processes.json`; `restore` re-issues a start for each of them.
//! Only what a start needs is kept, plus the restart count.
//!
//! ```text
//! [
//!   { "script": "/srv/app/server", "name": "super-fun", "instances": 2, "restarts": 3 }
//! ]
//! ```
//!
//! ## Rules
//! - The file is replaced atomically (written next to it, then renamed).
//! - A missing file restores nothing; it is not an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BossError;
use crate::process::{ProcessSpec, StartOptions};

/// Minimal descriptor sufficient to start a process again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedProcess {
    pub script: PathBuf,
    #[serde(flatten)]
    pub options: StartOptions,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub restarts: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl PersistedProcess {
    pub fn new(spec: &ProcessSpec, restarts: u32) -> Self {
        Self {
            script: spec.script.clone(),
            options: spec.options.clone(),
            restarts,
        }
    }

    pub fn into_spec(self) -> (ProcessSpec, u32) {
        (ProcessSpec::with_options(self.script, self.options), self.restarts)
    }
}

fn snapshot_err(path: &Path, reason: impl ToString) -> BossError {
    BossError::Snapshot {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Writes the list, replacing any previous snapshot.
pub(crate) async fn write(path: &Path, procs: &[PersistedProcess]) -> Result<(), BossError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| snapshot_err(path, e))?;
    }
    let body = serde_json::to_vec_pretty(procs).map_err(|e| snapshot_err(path, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| snapshot_err(path, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| snapshot_err(path, e))
}

/// Reads the list; a missing file is an empty list.
pub(crate) async fn read(path: &Path) -> Result<Vec<PersistedProcess>, BossError> {
    let body = match tokio::fs::read(path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(snapshot_err(path, e)),
    };
    serde_json::from_slice(&body).map_err(|e| snapshot_err(path, e))
}
