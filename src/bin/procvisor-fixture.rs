//! Minimal managed program used by the integration tests and the demo.
//!
//! Modes (first argument):
//! - *(none)*: serve the control channel and wait for `kill`/`restart`.
//! - `crash-on-start`: exit with code 1 before serving.
//! - `never-ready`: stay alive without ever serving, ignoring SIGTERM.
//!
//! Custom commands:
//! - `custom:hello` → `"hello world"`
//! - `custom:echo` → the payload
//! - `custom:emit` `{name, payload}` → emits `name` to connected clients
//! - `custom:euthanise` → exit with code 1

use std::time::Duration;

use anyhow::Context;
use procvisor::{ControlServer, ExitRequest};
use serde_json::{Value, json};
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;

enum Action {
    Emit(String, Option<Value>),
    Die,
}

enum Next {
    Exit(Option<ExitRequest>),
    Act(Option<Action>),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    match std::env::args().nth(1).as_deref() {
        Some("crash-on-start") => {
            eprintln!("crashing on purpose");
            std::process::exit(1);
        }
        Some("never-ready") => {
            // swallow SIGTERM so only SIGKILL ends it
            let mut term = tokio::signal::unix::signal(SignalKind::terminate())?;
            loop {
                term.recv().await;
            }
        }
        _ => {}
    }

    let (tx, mut actions) = mpsc::unbounded_channel();
    let emit_tx = tx.clone();
    let server = ControlServer::from_env()
        .context("not started by procvisor")?
        .on("custom:hello", |_| async { Ok(json!("hello world")) })
        .on("custom:echo", |payload| async move { Ok(payload) })
        .on("custom:emit", move |payload: Value| {
            let tx = emit_tx.clone();
            async move {
                let name = payload
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("missing name")?
                    .to_string();
                let body = payload.get("payload").cloned();
                tx.send(Action::Emit(name, body)).map_err(|e| e.to_string())?;
                Ok::<_, String>(Value::Null)
            }
        })
        .on("custom:euthanise", move |_| {
            let tx = tx.clone();
            async move {
                tx.send(Action::Die).map_err(|e| e.to_string())?;
                Ok::<_, String>(Value::Null)
            }
        });

    let worker = server.endpoint().worker;
    let mut handle = server.serve().await.context("serving control channel")?;
    handle.report_panics();
    println!("fixture {} up (worker {worker:?})", std::process::id());

    loop {
        let next = tokio::select! {
            req = handle.exit_requested() => Next::Exit(req),
            action = actions.recv() => Next::Act(action),
        };
        match next {
            Next::Exit(req) => {
                if let Some(ExitRequest::Restart) = req {
                    println!("restart requested");
                }
                handle.close();
                std::process::exit(0);
            }
            Next::Act(Some(Action::Emit(name, payload))) => handle.emit(&name, payload),
            Next::Act(Some(Action::Die)) => {
                // let the reply reach the caller
                tokio::time::sleep(Duration::from_millis(50)).await;
                handle.close();
                std::process::exit(1);
            }
            Next::Act(None) => return Ok(()),
        }
    }
}
