//! # Instance monitor: watches one spawned OS process.
//!
//! Every fact about the instance is posted to the owning actor's mailbox,
//! tagged with `(slot, generation)`, so the actor sees them in order with the
//! requests it receives.
//!
//! ## Flow
//! ```text
//! spawn ──► stdout/stderr readers ──────────────────────────► Log{info|error, line}
//!       ──► connect loop (25ms) ──► Connected
//!                               ──► ready handshake ──► Ready{session}
//!                                        └─ timeout ──► HandshakeFailed, SIGKILL
//!       ──► event relay ──────────────────────────────────► Relay{name, payload}
//!       ──► child exit ──► drain events and output ──► remove socket ──► Exited{exit}
//! ```
//!
//! ## Rules
//! - `Exited` is always the last message of a generation.
//! - The handshake timeout is not applied to debug instances (they wait to be resumed).

use std::io::ErrorKind;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UnixStream;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::control::{ControlSession, Message};
use crate::error::ControlError;
use crate::process::ExitInfo;

use super::actor::Msg;

const CONNECT_RETRY: Duration = Duration::from_millis(25);
const DRAIN_WINDOW: Duration = Duration::from_millis(100);

/// What the monitor reports about its instance.
pub(crate) enum InstanceEvent {
    /// The control socket accepted a connection.
    Connected,
    /// The `ready` handshake arrived.
    Ready { session: ControlSession },
    /// No handshake in time; the instance is being killed.
    HandshakeFailed { reason: String },
    /// An `event` message from the instance.
    Relay {
        name: String,
        payload: Option<serde_json::Value>,
    },
    /// One line of stdout (`info`) or stderr (`error`).
    Log { level: &'static str, line: String },
    /// The OS process is gone.
    Exited { exit: ExitInfo },
}

pub(crate) struct Monitor {
    pub slot: usize,
    pub generation: u64,
    pub child: Child,
    pub socket: PathBuf,
    pub handshake_timeout: Option<Duration>,
    pub tx: mpsc::UnboundedSender<Msg>,
}

impl Monitor {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn post(&self, event: InstanceEvent) {
        let _ = self.tx.send(Msg::Instance {
            slot: self.slot,
            generation: self.generation,
            event,
        });
    }

    async fn run(mut self) {
        let mut output = Vec::with_capacity(2);
        if let Some(out) = self.child.stdout.take() {
            output.push(self.forward_lines(out, "info"));
        }
        if let Some(err) = self.child.stderr.take() {
            output.push(self.forward_lines(err, "error"));
        }

        let handshake = handshake(
            self.socket.clone(),
            self.handshake_timeout,
            self.tx.clone(),
            self.slot,
            self.generation,
        );
        let phase = tokio::select! {
            res = handshake => Phase::Handshook(res),
            status = self.child.wait() => Phase::Exited(status),
        };

        let status = match phase {
            Phase::Exited(status) => status,
            Phase::Handshook(Err(reason)) => {
                self.post(InstanceEvent::HandshakeFailed { reason });
                let _ = self.child.start_kill();
                self.child.wait().await
            }
            Phase::Handshook(Ok((session, events))) => {
                self.post(InstanceEvent::Ready { session });
                self.relay_until_exit(events).await
            }
        };

        for reader in output {
            let _ = tokio::time::timeout(DRAIN_WINDOW, reader).await;
        }

        let _ = tokio::fs::remove_file(&self.socket).await;
        let exit = status.map(exit_info).unwrap_or_default();
        debug!(slot = self.slot, generation = self.generation, ?exit, "instance exited");
        self.post(InstanceEvent::Exited { exit });
    }

    async fn relay_until_exit(
        &mut self,
        mut events: mpsc::UnboundedReceiver<Message>,
    ) -> std::io::Result<ExitStatus> {
        let status = loop {
            let next = tokio::select! {
                msg = events.recv() => Next::Message(msg),
                status = self.child.wait() => Next::Exit(status),
            };
            match next {
                Next::Message(Some(msg)) => self.relay(msg),
                Next::Message(None) => break self.child.wait().await,
                Next::Exit(status) => break status,
            }
        };

        // events written just before exit are still in flight on the socket
        while let Ok(Some(msg)) = tokio::time::timeout(DRAIN_WINDOW, events.recv()).await {
            self.relay(msg);
        }
        status
    }

    fn relay(&self, msg: Message) {
        if let Some(name) = msg.name {
            self.post(InstanceEvent::Relay {
                name,
                payload: msg.payload,
            });
        }
    }

    fn forward_lines<R>(&self, reader: R, level: &'static str) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.tx.clone();
        let (slot, generation) = (self.slot, self.generation);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg = Msg::Instance {
                    slot,
                    generation,
                    event: InstanceEvent::Log { level, line },
                };
                if tx.send(msg).is_err() {
                    break;
                }
            }
        })
    }
}

enum Next {
    Message(Option<Message>),
    Exit(std::io::Result<ExitStatus>),
}

enum Phase {
    Handshook(Result<(ControlSession, mpsc::UnboundedReceiver<Message>), String>),
    Exited(std::io::Result<ExitStatus>),
}

async fn handshake(
    socket: PathBuf,
    timeout: Option<Duration>,
    tx: mpsc::UnboundedSender<Msg>,
    slot: usize,
    generation: u64,
) -> Result<(ControlSession, mpsc::UnboundedReceiver<Message>), String> {
    let attempt = async {
        let stream = connect(&socket).await?;
        let _ = tx.send(Msg::Instance {
            slot,
            generation,
            event: InstanceEvent::Connected,
        });
        let (session, events) = ControlSession::handshake(stream, socket.clone(), true).await?;
        events
            .map(|rx| (session, rx))
            .ok_or(ControlError::Disconnected)
    };

    let res = match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| ControlError::Timeout)
            .and_then(|r| r),
        None => attempt.await,
    };
    res.map_err(|e| e.to_string())
}

async fn connect(socket: &Path) -> Result<UnixStream, ControlError> {
    loop {
        match UnixStream::connect(socket).await {
            Ok(stream) => return Ok(stream),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                tokio::time::sleep(CONNECT_RETRY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_output_and_exit_of_a_plain_process() {
        let dir = tempfile::tempdir().unwrap();
        let child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg("echo hello; echo oops >&2; exit 3")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        Monitor {
            slot: 0,
            generation: 7,
            child,
            socket: dir.path().join("never.sock"),
            handshake_timeout: None,
            tx,
        }
        .spawn();

        let mut lines = Vec::new();
        let exit = loop {
            let Some(Msg::Instance { generation, event, .. }) = rx.recv().await else {
                panic!("mailbox closed");
            };
            assert_eq!(generation, 7);
            match event {
                InstanceEvent::Log { level, line } => lines.push((level, line)),
                InstanceEvent::Exited { exit } => break exit,
                _ => {}
            }
        };
        assert_eq!(exit.code, Some(3));
        assert!(lines.contains(&("info", "hello".to_string())));
        assert!(lines.contains(&("error", "oops".to_string())));
    }

    #[tokio::test]
    async fn missed_handshake_kills_the_instance() {
        let dir = tempfile::tempdir().unwrap();
        let child = tokio::process::Command::new("/bin/sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        Monitor {
            slot: 0,
            generation: 1,
            child,
            socket: dir.path().join("absent.sock"),
            handshake_timeout: Some(Duration::from_millis(100)),
            tx,
        }
        .spawn();

        let mut failed = false;
        let exit = loop {
            let Some(Msg::Instance { event, .. }) = rx.recv().await else {
                panic!("mailbox closed");
            };
            match event {
                InstanceEvent::HandshakeFailed { .. } => failed = true,
                InstanceEvent::Exited { exit } => break exit,
                _ => {}
            }
        };
        assert!(failed);
        assert_eq!(exit.signal, Some(9));
    }
}
