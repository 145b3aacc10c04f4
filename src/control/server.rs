//! # ControlServer: the managed-process half of the control channel.
//!
//! A program supervised by procvisor builds a [`ControlServer`] from its
//! environment, registers custom command handlers and calls
//! [`serve`](ControlServer::serve). From then on the supervisor (and any caller
//! holding a [`ControlSession`](crate::ControlSession)) can reach it.
//!
//! ## Architecture
//! ```text
//! serve()
//!   ├─► debug requested? raise(SIGSTOP)      (suspend point; SIGCONT resumes)
//!   ├─► bind <dir>/<id>.<pid>.sock
//!   └─► accept loop
//!         └─► per connection:
//!               ├─► send ready{pid, title}
//!               ├─► writer: replies + broadcast events ──► socket
//!               └─► reader: command ──► spawn handler ──► reply{id}
//!                                 ├─ kill / restart ──► ControlHandle::exit_requested()
//!                                 ├─ heapdump / gc  ──► event <op>:start, Diagnostics, event <op>:complete
//!                                 └─ custom name    ──► registered handler
//! ```
//!
//! ## Rules
//! - Every connection receives `ready` first.
//! - Commands are handled concurrently; replies carry the command id.
//! - Events go to every open connection; with no connection they are dropped.
//! - `kill`/`restart` do not exit by themselves: the program decides when to exit.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::control::codec::ControlCodec;
use crate::control::diagnostics::{Diagnostics, MemoryReport};
use crate::control::message::{Message, MessageKind, commands};
use crate::control::{env, socket_path};
use crate::error::ControlError;

/// Handler for a custom command: payload in, reply payload (or error text) out.
pub type CommandHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Why the supervisor asked the process to exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitRequest {
    /// `kill`: stop for good.
    Kill,
    /// `restart`: exit so a replacement is started.
    Restart,
}

/// Where and how the server binds, normally read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Process id assigned by the supervisor.
    pub id: String,
    /// Directory holding control sockets.
    pub dir: PathBuf,
    /// Title reported in the handshake.
    pub title: Option<String>,
    /// Suspend at bootstrap until resumed.
    pub debug: bool,
    /// Port reserved for a debugger.
    pub debug_port: Option<u16>,
    /// Worker index when clustered.
    pub worker: Option<usize>,
}

impl Endpoint {
    /// Endpoint in `dir` for process `id`.
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
            title: None,
            debug: false,
            debug_port: None,
            worker: None,
        }
    }

    /// Reads the endpoint the supervisor passed through the environment.
    pub fn from_env() -> Result<Self, ControlError> {
        let id = std::env::var(env::ID).map_err(|_| ControlError::Environment { var: env::ID })?;
        let dir = std::env::var_os(env::SOCKET_DIR)
            .map(PathBuf::from)
            .ok_or(ControlError::Environment {
                var: env::SOCKET_DIR,
            })?;
        Ok(Self {
            id,
            dir,
            title: std::env::var(env::TITLE).ok(),
            debug: std::env::var(env::DEBUG).is_ok_and(|v| v == "1"),
            debug_port: std::env::var(env::DEBUG_PORT).ok().and_then(|v| v.parse().ok()),
            worker: std::env::var(env::WORKER).ok().and_then(|v| v.parse().ok()),
        })
    }

    /// Socket path for the current OS process.
    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.dir, &self.id, std::process::id())
    }
}

/// Server half of the control channel.
pub struct ControlServer {
    endpoint: Endpoint,
    title: String,
    handlers: HashMap<String, CommandHandler>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl ControlServer {
    /// Creates a server for an explicit endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        let title = endpoint
            .title
            .clone()
            .or_else(|| std::env::args().next())
            .unwrap_or_else(|| "procvisor-managed".to_string());
        Self {
            endpoint,
            title,
            handlers: HashMap::new(),
            diagnostics: Arc::new(MemoryReport::default()),
        }
    }

    /// Creates a server from the supervisor-provided environment.
    pub fn from_env() -> Result<Self, ControlError> {
        Ok(Self::new(Endpoint::from_env()?))
    }

    /// Overrides the title reported in the handshake.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Replaces the default [`MemoryReport`] diagnostics.
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Registers a handler for a custom command name.
    pub fn on<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |payload: Value| handler(payload).boxed());
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Endpoint this server binds.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Suspends when in debug mode, binds the socket and starts accepting connections.
    pub async fn serve(self) -> Result<ControlHandle, ControlError> {
        if self.endpoint.debug {
            suspend()?;
        }

        let path = self.endpoint.socket_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed stale control socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&path)?;

        let (events, _) = broadcast::channel(1024);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            pid: std::process::id(),
            title: self.title,
            handlers: self.handlers,
            diagnostics: self.diagnostics,
            events: events.clone(),
            exit: exit_tx,
        });

        tokio::spawn(accept_loop(listener, shared, shutdown.clone()));

        Ok(ControlHandle {
            path,
            events,
            exit: exit_rx,
            shutdown,
        })
    }
}

fn suspend() -> Result<(), ControlError> {
    nix::sys::signal::raise(nix::sys::signal::Signal::SIGSTOP)
        .map_err(|e| ControlError::Io(std::io::Error::from(e)))
}

/// Handle returned by [`ControlServer::serve`].
pub struct ControlHandle {
    path: PathBuf,
    events: broadcast::Sender<Message>,
    exit: mpsc::UnboundedReceiver<ExitRequest>,
    shutdown: CancellationToken,
}

impl ControlHandle {
    /// Bound socket path.
    pub fn socket(&self) -> &Path {
        &self.path
    }

    /// Emits an event to every connected client (relayed as `process:<name>`).
    pub fn emit(&self, name: &str, payload: Option<Value>) {
        let _ = self.events.send(Message::event(name, payload));
    }

    /// Emits a `log:<level>` event.
    pub fn log(&self, level: &str, line: impl Into<String>) {
        self.emit(&format!("log:{level}"), Some(Value::String(line.into())));
    }

    /// Reports panics as `uncaughtexception` events, keeping the previous hook.
    pub fn report_panics(&self) {
        let events = self.events.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = events.send(Message::event(
                "uncaughtexception",
                Some(Value::String(info.to_string())),
            ));
            previous(info);
        }));
    }

    /// Waits for a `kill` or `restart` command. `None` once the server is closed.
    pub async fn exit_requested(&mut self) -> Option<ExitRequest> {
        tokio::select! {
            req = self.exit.recv() => req,
            _ = self.shutdown.cancelled() => None,
        }
    }

    /// Stops accepting connections and removes the socket file.
    pub fn close(&self) {
        self.shutdown.cancel();
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.close();
    }
}

struct Shared {
    pid: u32,
    title: String,
    handlers: HashMap<String, CommandHandler>,
    diagnostics: Arc<dyn Diagnostics>,
    events: broadcast::Sender<Message>,
    exit: mpsc::UnboundedSender<ExitRequest>,
}

async fn accept_loop(listener: UnixListener, shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let shared = Arc::clone(&shared);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, shared, shutdown).await {
                        debug!(error = %e, "control connection ended");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "control accept failed");
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) -> Result<(), ControlError> {
    let mut framed = Framed::new(stream, ControlCodec::new());
    framed.send(Message::ready(shared.pid, &shared.title)).await?;

    let (mut sink, mut stream) = framed.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let mut events = shared.events.subscribe();
    let conn = shutdown.child_token();

    let writer_token = conn.clone();
    let writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = writer_token.cancelled() => break,
                msg = out_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                ev = events.recv() => match ev {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "control client lagging; events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        writer_token.cancel();
    });

    loop {
        let frame = tokio::select! {
            _ = conn.cancelled() => break,
            frame = stream.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                conn.cancel();
                let _ = writer.await;
                return Err(e);
            }
            None => break,
        };
        if msg.kind != MessageKind::Command {
            continue;
        }
        let shared = Arc::clone(&shared);
        let out = out_tx.clone();
        tokio::spawn(async move {
            if let Some(reply) = dispatch(&shared, msg).await {
                let _ = out.send(reply);
            }
        });
    }

    conn.cancel();
    let _ = writer.await;
    Ok(())
}

/// Runs one command; returns the reply when the command carried an id.
async fn dispatch(shared: &Shared, msg: Message) -> Option<Message> {
    let name = msg.name.unwrap_or_default();
    let payload = msg.payload.unwrap_or(Value::Null);

    let result: Result<Value, String> = match name.as_str() {
        commands::KILL => {
            let _ = shared.exit.send(ExitRequest::Kill);
            Ok(Value::Null)
        }
        commands::RESTART => {
            let _ = shared.exit.send(ExitRequest::Restart);
            Ok(Value::Null)
        }
        commands::HEAPDUMP => {
            let _ = shared.events.send(Message::event("heapdump:start", None));
            let res = shared.diagnostics.dump_heap().await;
            let done = res.as_ref().ok().map(|p| Value::String(p.display().to_string()));
            let _ = shared.events.send(Message::event("heapdump:complete", done));
            res.map(|p| Value::String(p.display().to_string()))
        }
        commands::GC => {
            let _ = shared.events.send(Message::event("gc:start", None));
            let res = shared.diagnostics.force_gc().await;
            let _ = shared.events.send(Message::event("gc:complete", None));
            res.map(|()| Value::Bool(true))
        }
        custom => match shared.handlers.get(custom) {
            Some(handler) => handler(payload).await,
            None => Err(format!("unknown command {custom:?}")),
        },
    };

    let id = msg.id?;
    Some(match result {
        Ok(value) => Message::reply(id, value),
        Err(reason) => Message::failure(id, reason),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlSession;
    use serde_json::json;
    use std::time::Duration;

    async fn serve_in(dir: &Path, id: &str) -> ControlHandle {
        ControlServer::new(Endpoint::new(id, dir))
            .with_title("unit")
            .with_diagnostics(Arc::new(MemoryReport::in_dir(dir)))
            .on("custom:hello", |_| async { Ok(json!("hello world")) })
            .on("custom:echo", |payload| async move { Ok(payload) })
            .on("custom:slow", |_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!("slow"))
            })
            .serve()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn handshake_reports_pid_and_title() {
        let dir = tempfile::tempdir().unwrap();
        let handle = serve_in(dir.path(), "hs").await;
        let session = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(session.pid(), std::process::id());
        assert_eq!(session.title(), "unit");
    }

    #[tokio::test]
    async fn replies_are_correlated_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let handle = serve_in(dir.path(), "corr").await;
        let session = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();

        let (slow, hello, echo, heap, gc) = tokio::join!(
            session.request("custom:slow", None),
            session.request("custom:hello", None),
            session.request("custom:echo", Some(json!({"n": 7}))),
            session.dump_heap(),
            session.force_gc(),
        );
        assert_eq!(slow.unwrap(), json!("slow"));
        assert_eq!(hello.unwrap(), json!("hello world"));
        assert_eq!(echo.unwrap(), json!({"n": 7}));
        assert!(heap.unwrap().starts_with(dir.path()));
        gc.unwrap();
    }

    #[tokio::test]
    async fn unknown_command_fails_remotely() {
        let dir = tempfile::tempdir().unwrap();
        let handle = serve_in(dir.path(), "unknown").await;
        let session = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();
        let err = session.request("custom:nope", None).await.unwrap_err();
        assert_eq!(err.as_label(), "control_remote");
    }

    #[tokio::test]
    async fn diagnostics_emit_start_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let handle = serve_in(dir.path(), "diag").await;
        let (session, mut events) =
            ControlSession::connect_with_events(handle.socket(), Duration::from_secs(2))
                .await
                .unwrap();

        session.force_gc().await.unwrap();
        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.name.as_deref(), Some("gc:start"));
        assert_eq!(second.name.as_deref(), Some("gc:complete"));

        handle.log("info", "hi");
        let log = events.recv().await.unwrap();
        assert_eq!(log.name.as_deref(), Some("log:info"));
    }

    #[tokio::test]
    async fn kill_is_surfaced_to_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = serve_in(dir.path(), "kill").await;
        let session = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();
        session.kill().unwrap();
        assert_eq!(handle.exit_requested().await, Some(ExitRequest::Kill));
        session.restart().unwrap();
        assert_eq!(handle.exit_requested().await, Some(ExitRequest::Restart));
    }

    #[tokio::test]
    async fn calls_fail_once_the_server_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let handle = serve_in(dir.path(), "gone").await;
        let session = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.request("custom:slow", None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(handle);

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_disconnect(), "unexpected error {err:?}");
        session.closed().await;
        assert!(matches!(
            session.request("custom:hello", None).await,
            Err(ControlError::Disconnected)
        ));
        assert!(session.kill().is_err());
    }

    #[tokio::test]
    async fn disconnect_releases_only_the_local_handle() {
        let dir = tempfile::tempdir().unwrap();
        let handle = serve_in(dir.path(), "local").await;
        let first = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();
        first.disconnect();
        assert!(!first.is_connected());

        let second = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(
            second.request("custom:hello", None).await.unwrap(),
            json!("hello world")
        );
    }
}
