//! # Control channel between the supervisor and its managed processes.
//!
//! Each managed OS process listens on a Unix socket named
//! `<socket_dir>/<process id>.<os pid>.sock` and speaks length-prefixed JSON
//! [`Message`]s over it.
//!
//! - [`ControlServer`] runs inside the managed process.
//! - [`ControlSession`] is the caller side, used by the supervisor itself and
//!   handed out by `connect_to_process` / `connect_to_worker`.

mod codec;
mod diagnostics;
mod message;
mod server;
mod session;

use std::path::{Path, PathBuf};

pub use codec::{ControlCodec, MAX_FRAME_LEN};
pub use diagnostics::{Diagnostics, MemoryReport};
pub use message::{Message, MessageKind, ReadyPayload, commands};
pub use server::{CommandHandler, ControlHandle, ControlServer, Endpoint, ExitRequest};
pub use session::{ControlSession, SessionIntent};

pub(crate) use session::IntentHook;

/// Environment variables the supervisor sets on every managed process.
pub mod env {
    /// Process id assigned by the supervisor.
    pub const ID: &str = "PROCVISOR_ID";
    /// Directory where the control socket must be created.
    pub const SOCKET_DIR: &str = "PROCVISOR_SOCKET_DIR";
    /// Title reported in the handshake.
    pub const TITLE: &str = "PROCVISOR_TITLE";
    /// `1` when the process must suspend itself until resumed.
    pub const DEBUG: &str = "PROCVISOR_DEBUG";
    /// Port reserved for a debugger.
    pub const DEBUG_PORT: &str = "PROCVISOR_DEBUG_PORT";
    /// Worker index, set only for clustered processes.
    pub const WORKER: &str = "PROCVISOR_WORKER";
}

/// Socket path of OS process `pid` belonging to managed process `id`.
///
/// ```
/// use std::path::Path;
///
/// let p = procvisor::control::socket_path(Path::new("/run/pv"), "web", 42);
/// assert_eq!(p, Path::new("/run/pv/web.42.sock"));
/// ```
pub fn socket_path(dir: &Path, id: &str, pid: u32) -> PathBuf {
    dir.join(format!("{id}.{pid}.sock"))
}
