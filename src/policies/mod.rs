//! Restart and abort policies.
//!
//! This module groups the knobs that control **whether** a crashed process is
//! replaced and **how long** to wait before doing so.
//!
//! ## Contents
//! - [`AbortPolicy`] fast-failure threshold and minimum uptime
//! - [`BackoffPolicy`] how respawn delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! Config { abort: AbortPolicy, backoff: BackoffPolicy, .. }
//!      └─► core::actor::ProcessActor uses:
//!           - abort.classify(..) on every unexpected exit
//!           - abort.is_exhausted(n) to decide restart vs. abort
//!           - backoff.after_failures(n) to schedule the respawn
//! ```

mod abort;
mod backoff;
mod jitter;

pub use abort::{AbortPolicy, ExitClass};
pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
