//! # Process specification.
//!
//! Defines [`ProcessSpec`], the request to start a managed process: the script
//! to execute plus its [`StartOptions`] (name, arguments, working directory,
//! environment, identity, instance count, debug mode).
//!
//! The same structure (flattened) is what the snapshot writer persists, so every
//! option field has a serde default and may be omitted from a persisted record.
//!
//! ## Rules
//! - [`ProcessSpec::validate`] runs before any identity lookup or spawn.
//! - `instances > 1` makes the process clustered for its whole lifetime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BossError;

/// Options accepted when starting a process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartOptions {
    /// Display name (defaults to the script file name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Command line arguments.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// User to run as (name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Group to run as (name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Desired worker count.
    pub instances: usize,
    /// Start suspended; see [`Supervisor::resume_process`](crate::Supervisor::resume_process).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            name: None,
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            user: None,
            group: None,
            instances: 1,
            debug: false,
        }
    }
}

/// Request to start one managed process.
///
/// ## Example
/// ```rust
/// use procvisor::ProcessSpec;
///
/// let spec = ProcessSpec::new("/usr/local/bin/web")
///     .with_name("web")
///     .with_arg("--port=8080")
///     .with_env("RUST_LOG", "info")
///     .with_instances(2);
///
/// assert_eq!(spec.name(), "web");
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Executable to run.
    pub script: PathBuf,
    /// Start options.
    #[serde(flatten)]
    pub options: StartOptions,
}

impl ProcessSpec {
    /// Creates a spec with default options.
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            options: StartOptions::default(),
        }
    }

    /// Creates a spec from explicit options.
    pub fn with_options(script: impl Into<PathBuf>, options: StartOptions) -> Self {
        Self {
            script: script.into(),
            options,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.options.args.push(arg.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.insert(key.into(), value.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.options.user = Some(user.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.options.group = Some(group.into());
        self
    }

    pub fn with_instances(mut self, instances: usize) -> Self {
        self.options.instances = instances;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Display name: the explicit name, or the script's file name.
    pub fn name(&self) -> String {
        if let Some(name) = &self.options.name {
            return name.clone();
        }
        self.script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.script.display().to_string())
    }

    /// `true` when more than one worker was requested.
    pub fn is_clustered(&self) -> bool {
        self.options.instances > 1
    }

    /// Checks the request for malformed values.
    ///
    /// Identity names are only checked for shape here; resolution happens in
    /// [`IdentityResolver`](crate::IdentityResolver).
    pub fn validate(&self) -> Result<(), BossError> {
        if self.script.as_os_str().is_empty() {
            return Err(BossError::validation("script must not be empty"));
        }
        if has_nul(&self.script) {
            return Err(BossError::validation("script contains a NUL byte"));
        }
        if self.options.instances == 0 {
            return Err(BossError::validation("instances must be at least 1"));
        }
        if self.options.name.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(BossError::validation("name must not be blank"));
        }
        if self.options.user.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(BossError::validation("user must not be blank"));
        }
        if self.options.group.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(BossError::validation("group must not be blank"));
        }
        for (key, value) in &self.options.env {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(BossError::validation(format!(
                    "invalid environment variable name {key:?}"
                )));
            }
            if value.contains('\0') {
                return Err(BossError::validation(format!(
                    "environment variable {key} contains a NUL byte"
                )));
            }
        }
        if self.options.args.iter().any(|a| a.contains('\0')) {
            return Err(BossError::validation("argument contains a NUL byte"));
        }
        Ok(())
    }
}

fn has_nul(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_defaults_to_file_name() {
        let spec = ProcessSpec::new("/opt/app/server.sh");
        assert_eq!(spec.name(), "server.sh");
        assert_eq!(spec.clone().with_name("api").name(), "api");
    }

    #[test]
    fn rejects_zero_instances() {
        let err = ProcessSpec::new("/bin/true").with_instances(0).validate().unwrap_err();
        assert_eq!(err.as_label(), "boss_validation");
        assert!(err.to_string().contains("instances"));
    }

    #[test]
    fn rejects_malformed_env_and_blank_identity() {
        assert!(ProcessSpec::new("/bin/true").with_env("A=B", "x").validate().is_err());
        assert!(ProcessSpec::new("/bin/true").with_env("", "x").validate().is_err());

        let err = ProcessSpec::new("/bin/true").with_user(" ").validate().unwrap_err();
        assert!(err.to_string().contains("user"));
        let err = ProcessSpec::new("/bin/true").with_group("").validate().unwrap_err();
        assert!(err.to_string().contains("group"));
    }

    #[test]
    fn persisted_record_fills_defaults() {
        let spec: ProcessSpec =
            serde_json::from_str(r#"{"script":"/bin/app","name":"super-fun"}"#).unwrap();
        assert_eq!(spec.name(), "super-fun");
        assert_eq!(spec.options.instances, 1);
        assert!(!spec.options.debug);
        assert!(spec.validate().is_ok());
    }
}
