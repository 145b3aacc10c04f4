//! # Event subscribers for the procvisor runtime.
//!
//! This module provides the [`Subscribe`] trait and a built-in implementation
//! for handling events published on the [`Bus`](crate::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   ProcessActor ── publish(Event) ──► Bus ──► per-subscriber queue ──► worker
//!                                                                         │
//!                                                    Subscribe::on_event(&Event)
//!                                                         ┌───────┬───────┴──┐
//!                                                         ▼       ▼          ▼
//!                                                     LogWriter  Metrics   Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use procvisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct CrashCounter;
//!
//! #[async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::ProcessRestarting {
//!             // increment crash counter
//!         }
//!     }
//!     fn pattern(&self) -> &str {
//!         "process:*"
//!     }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscribe::Subscribe;
