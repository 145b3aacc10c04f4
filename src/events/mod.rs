//! Lifecycle events: types, topic patterns and the bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by process actors, the registry and
//! subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`TopicPattern`] exact / prefix (`worker:*`) / catch-all topic matching
//! - [`Bus`], [`EventStream`] wildcard publish/subscribe with per-subscription queues
//!
//! ## Quick reference
//! - **Publishers**: `ProcessActor` (lifecycle, cluster and relayed events),
//!   `Registry` (fatality, shutdown), bus workers (subscriber panics).
//! - **Consumers**: callers via [`Bus::subscribe`]/[`Bus::on`], and attached
//!   [`Subscribe`](crate::Subscribe) implementations.

mod bus;
mod event;
mod topic;

pub use bus::{Bus, EventStream, SubscriptionId};
pub use event::{Event, EventKind};
pub use topic::TopicPattern;
