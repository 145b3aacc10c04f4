//! # Subscribe: custom handlers on the event bus
//!
//! A [`Subscribe`] implementation receives every published event whose topic
//! matches its [`pattern`](Subscribe::pattern). Attaching it to the
//! [`Bus`](crate::Bus) gives it an own queue and worker task.
//!
//! ## Contract
//! - A slow handler only delays its own queue; publishers and other
//!   subscribers keep going.
//! - A panicking handler is reported as `boss:subscriber:panicked` and keeps
//!   receiving later events.
//!
//! ## Example
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use procvisor::{Event, Subscribe};
//!
//! #[derive(Default)]
//! struct CrashCounter(AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, _ev: &Event) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//!     fn name(&self) -> &'static str { "crash-counter" }
//!     fn pattern(&self) -> &str { "process:restarting" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event handler driven by its own worker task.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    /// Label used in logs and in `boss:subscriber:panicked` reasons.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Topics delivered to this subscriber: `*`, an exact topic or `prefix:*`.
    fn pattern(&self) -> &str {
        "*"
    }
}
