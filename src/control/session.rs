//! # ControlSession: caller-held handle to a control channel.
//!
//! A session is one Unix socket connection to a managed process (or a single
//! cluster worker). It exposes a fixed capability set: `kill`, `restart`,
//! `send`, `request`, `dump_heap`, `force_gc`, `disconnect`.
//!
//! ## Architecture
//! ```text
//!   request("custom:hello") ──► pending[id] = oneshot ──► outbound queue ──► writer task ──► socket
//!                                                                                              │
//!   oneshot ◄── pending.remove(id) ◄── reader task ◄── reply{id} ◄────────────────────────────┘
//!                                          └── event{name} ──► events queue (if requested)
//! ```
//!
//! ## Rules
//! - Replies are matched to callers strictly by id, never by arrival order.
//! - Concurrent requests on one session never block one another.
//! - When the socket closes, every pending and future call fails with
//!   [`ControlError::Disconnected`] instead of hanging.
//! - `disconnect()` only releases the local handle; it never implies `kill`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::control::codec::ControlCodec;
use crate::control::message::{Message, MessageKind, ReadyPayload, commands};
use crate::error::ControlError;

type Reply = Result<Value, ControlError>;
type Pending = Arc<Mutex<HashMap<String, (String, oneshot::Sender<Reply>)>>>;

/// What a caller asked the remote process to do, reported just before the command is queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionIntent {
    Kill,
    Restart,
}

/// Receives `Some(intent)` before an exit command is queued and `None` when
/// queueing it failed after all.
pub(crate) type IntentHook = Arc<dyn Fn(Option<SessionIntent>) + Send + Sync>;

struct SessionInner {
    ready: ReadyPayload,
    socket: PathBuf,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Pending,
    closed: CancellationToken,
    intent: Mutex<Option<IntentHook>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Live handle bound to one control endpoint. Cheap to clone.
#[derive(Clone)]
pub struct ControlSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("pid", &self.inner.ready.pid)
            .field("title", &self.inner.ready.title)
            .field("socket", &self.inner.socket)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ControlSession {
    /// Connects to `socket` and waits for the `ready` handshake.
    pub async fn connect(socket: &Path, timeout: Duration) -> Result<Self, ControlError> {
        let (session, _) = Self::open(socket, timeout, false).await?;
        Ok(session)
    }

    /// Like [`connect`](Self::connect), also returning the stream of `event` messages.
    pub async fn connect_with_events(
        socket: &Path,
        timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Message>), ControlError> {
        let (session, events) = Self::open(socket, timeout, true).await?;
        events
            .map(|rx| (session, rx))
            .ok_or(ControlError::Disconnected)
    }

    async fn open(
        socket: &Path,
        timeout: Duration,
        with_events: bool,
    ) -> Result<(Self, Option<mpsc::UnboundedReceiver<Message>>), ControlError> {
        let fut = async {
            let stream = UnixStream::connect(socket).await?;
            Self::handshake(stream, socket.to_path_buf(), with_events).await
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    /// Reads the `ready` handshake from an established stream and starts the I/O tasks.
    pub(crate) async fn handshake(
        stream: UnixStream,
        socket: PathBuf,
        with_events: bool,
    ) -> Result<(Self, Option<mpsc::UnboundedReceiver<Message>>), ControlError> {
        let mut framed = Framed::new(stream, ControlCodec::new());
        let first = framed.next().await.ok_or_else(|| ControlError::Handshake {
            reason: "connection closed before ready".into(),
        })??;
        let ready = first.ready_payload().ok_or_else(|| ControlError::Handshake {
            reason: format!("expected ready, got {:?}", first.kind),
        })?;

        let (sink, stream) = framed.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        let (events_tx, events_rx) = if with_events {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        tokio::spawn(write_loop(sink, out_rx, closed.clone()));
        tokio::spawn(read_loop(stream, Arc::clone(&pending), events_tx, closed.clone()));

        let session = Self {
            inner: Arc::new(SessionInner {
                ready,
                socket,
                outbound: out_tx,
                pending,
                closed,
                intent: Mutex::new(None),
            }),
        };
        Ok((session, events_rx))
    }

    /// Pid reported by the remote process in its handshake.
    pub fn pid(&self) -> u32 {
        self.inner.ready.pid
    }

    /// Title reported by the remote process in its handshake.
    pub fn title(&self) -> &str {
        &self.inner.ready.title
    }

    /// Endpoint this session is bound to.
    pub fn socket(&self) -> &Path {
        &self.inner.socket
    }

    /// `false` once the socket closed or [`disconnect`](Self::disconnect) was called.
    pub fn is_connected(&self) -> bool {
        !self.inner.closed.is_cancelled()
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Asks the process to terminate gracefully. Completion is observed as a process exit.
    pub fn kill(&self) -> Result<(), ControlError> {
        self.exit_command(SessionIntent::Kill, commands::KILL)
    }

    /// Asks the process to exit so the supervisor brings up a replacement.
    pub fn restart(&self) -> Result<(), ControlError> {
        self.exit_command(SessionIntent::Restart, commands::RESTART)
    }

    /// The supervisor must know the intent before it sees the exit it causes,
    /// and must never keep one for a command that was not sent.
    fn exit_command(&self, intent: SessionIntent, name: &str) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::Disconnected);
        }
        self.announce(Some(intent));
        let sent = self.send(name, None);
        if sent.is_err() {
            self.announce(None);
        }
        sent
    }

    /// Sends a command without waiting for a reply.
    pub fn send(&self, name: &str, payload: Option<Value>) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::Disconnected);
        }
        self.inner
            .outbound
            .send(Message::command(name, payload, None))
            .map_err(|_| ControlError::Disconnected)
    }

    /// Sends a command and waits for exactly one correlated reply.
    pub async fn request(&self, name: &str, payload: Option<Value>) -> Result<Value, ControlError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .insert(id.clone(), (name.to_string(), tx));

        // The reader cancels `closed` before draining, so a request inserted after
        // the drain always observes the cancellation here.
        if self.inner.closed.is_cancelled()
            || self
                .inner
                .outbound
                .send(Message::command(name, payload, Some(id.clone())))
                .is_err()
        {
            self.inner.pending.lock().remove(&id);
            return Err(ControlError::Disconnected);
        }

        rx.await.unwrap_or(Err(ControlError::Disconnected))
    }

    /// Triggers a heap dump in the remote process and returns the dump path.
    pub async fn dump_heap(&self) -> Result<PathBuf, ControlError> {
        let payload = self.request(commands::HEAPDUMP, None).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Triggers a collection in the remote process.
    pub async fn force_gc(&self) -> Result<(), ControlError> {
        self.request(commands::GC, None).await.map(|_| ())
    }

    /// Releases this handle's connection. The remote process is not affected.
    pub fn disconnect(&self) {
        self.inner.closed.cancel();
    }

    pub(crate) fn set_intent_hook(&self, hook: IntentHook) {
        *self.inner.intent.lock() = Some(hook);
    }

    fn announce(&self, intent: Option<SessionIntent>) {
        let hook = self.inner.intent.lock().clone();
        if let Some(hook) = hook {
            hook(intent);
        }
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Message>,
    closed: CancellationToken,
) where
    S: futures::Sink<Message, Error = ControlError> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        debug!(error = %e, "control write failed");
                        break;
                    }
                }
                None => break,
            },
            _ = closed.cancelled() => break,
        }
    }
    closed.cancel();
    let _ = sink.close().await;
}

async fn read_loop<S>(
    mut stream: S,
    pending: Pending,
    events: Option<mpsc::UnboundedSender<Message>>,
    closed: CancellationToken,
) where
    S: futures::Stream<Item = Result<Message, ControlError>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            frame = stream.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "control read failed");
                break;
            }
            None => break,
        };
        match msg.kind {
            MessageKind::Reply => {
                let Some(id) = msg.id else { continue };
                let Some((command, tx)) = pending.lock().remove(&id) else {
                    continue;
                };
                let reply = match msg.error {
                    Some(reason) => Err(ControlError::Remote { command, reason }),
                    None => Ok(msg.payload.unwrap_or(Value::Null)),
                };
                let _ = tx.send(reply);
            }
            MessageKind::Event => {
                if let Some(tx) = &events {
                    let _ = tx.send(msg);
                }
            }
            MessageKind::Ready | MessageKind::Command => {}
        }
    }

    closed.cancel();
    let drained: Vec<_> = pending.lock().drain().collect();
    for (_, (_, tx)) in drained {
        let _ = tx.send(Err(ControlError::Disconnected));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlServer, Endpoint};

    fn recording_hook() -> (IntentHook, Arc<Mutex<Vec<Option<SessionIntent>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |intent: Option<SessionIntent>| sink.lock().push(intent)), seen)
    }

    #[tokio::test]
    async fn exit_commands_on_a_closed_session_announce_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ControlServer::new(Endpoint::new("intent", dir.path()))
            .serve()
            .await
            .unwrap();
        let session = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();
        let (hook, seen) = recording_hook();
        session.set_intent_hook(hook);

        session.disconnect();
        assert!(matches!(session.kill(), Err(ControlError::Disconnected)));
        assert!(matches!(session.restart(), Err(ControlError::Disconnected)));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn sent_exit_command_is_announced_once() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ControlServer::new(Endpoint::new("intent-live", dir.path()))
            .serve()
            .await
            .unwrap();
        let session = ControlSession::connect(handle.socket(), Duration::from_secs(2))
            .await
            .unwrap();
        let (hook, seen) = recording_hook();
        session.set_intent_hook(hook);

        session.kill().unwrap();
        assert_eq!(*seen.lock(), vec![Some(SessionIntent::Kill)]);
    }
}
