//! # Termination signals.
//!
//! [`wait_for_shutdown_signal`] completes when the supervisor host receives
//! `SIGINT` (Ctrl-C), `SIGTERM` (systemd, container runtimes) or `SIGQUIT`.

use tokio::signal::unix::{SignalKind, signal};

/// Waits for a termination signal and returns its name.
///
/// Each call installs independent listeners. Fails only if a listener cannot
/// be registered.
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}
