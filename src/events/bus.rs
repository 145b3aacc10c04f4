//! # Event bus with wildcard topic subscriptions.
//!
//! [`Bus`] delivers every published [`Event`] to each subscription whose
//! [`TopicPattern`] matches the event topic.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Subscriptions (many):
//!   ProcessActor 1 ──┐                ┌──► [queue] ──► EventStream::recv()
//!   ProcessActor 2 ──┼──► Bus::publish├──► [queue] ──► worker ──► Fn(&Event)       (on / once)
//!   Registry       ──┤   (match topic)└──► [queue] ──► worker ──► Subscribe::on_event (attach)
//!   Worker panics  ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` is synchronous and never waits on a subscriber.
//! - **No drops**: each subscription owns an unbounded queue; events are only lost once
//!   the subscription itself is gone.
//! - **Per-subscription FIFO**: one publisher's events reach each subscription in order.
//! - **Isolation**: a panicking handler is reported as `boss:subscriber:panicked` and its
//!   worker keeps processing the next event; other subscriptions are unaffected.
//! - **Once**: a `once` subscription receives exactly one event, even under concurrent publishes.
//!
//! **Warning**: `AssertUnwindSafe` is used for handler panics, which can leave shared
//! state inconsistent if a handler panics while holding a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::event::Event;
use super::topic::TopicPattern;
use crate::subscribers::Subscribe;

/// Handle identifying one subscription, used with [`Bus::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    pattern: TopicPattern,
    once: Option<AtomicBool>,
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

impl Subscription {
    fn is_spent(&self) -> bool {
        self.tx.is_closed()
            || self
                .once
                .as_ref()
                .is_some_and(|fired| fired.load(Ordering::Acquire))
    }
}

struct Inner {
    subs: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

/// Publish/subscribe hub shared by every component of one supervisor.
///
/// ### Properties
/// - **Cloneable**: cheap to clone (internally holds an `Arc`).
/// - **Concurrent**: subscribe/unsubscribe are safe while other threads publish.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("subscriptions", &self.inner.subs.read().len())
            .finish()
    }
}

impl Bus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subs: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Publishes an event to all matching subscriptions.
    ///
    /// Returns immediately. Spent subscriptions (dropped streams, fired `once`
    /// handlers) are pruned on the way out.
    pub fn publish(&self, ev: Event) {
        let ev = Arc::new(ev);
        let mut prune = false;
        {
            let subs = self.inner.subs.read();
            for sub in subs.iter() {
                if !sub.pattern.matches(ev.topic()) {
                    continue;
                }
                if let Some(fired) = &sub.once {
                    if fired.swap(true, Ordering::AcqRel) {
                        continue;
                    }
                    prune = true;
                }
                if sub.tx.send(Arc::clone(&ev)).is_err() {
                    prune = true;
                }
            }
        }
        if prune {
            self.inner.subs.write().retain(|s| !s.is_spent());
        }
    }

    /// Subscribes a stream to every event matching `pattern`.
    pub fn subscribe(&self, pattern: impl Into<TopicPattern>) -> EventStream {
        self.register(pattern.into(), false)
    }

    /// Subscribes a stream that receives only the first matching event.
    pub fn subscribe_once(&self, pattern: impl Into<TopicPattern>) -> EventStream {
        self.register(pattern.into(), true)
    }

    /// Runs `handler` for every matching event on a dedicated worker task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on<F>(&self, pattern: impl Into<TopicPattern>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let stream = self.register(pattern.into(), false);
        self.drive(stream, "handler", handler)
    }

    /// Runs `handler` for the first matching event only.
    pub fn once<F>(&self, pattern: impl Into<TopicPattern>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let stream = self.register(pattern.into(), true);
        self.drive(stream, "once-handler", handler)
    }

    /// Attaches a [`Subscribe`] implementation, driven by its own worker task.
    pub fn attach(&self, sub: Arc<dyn Subscribe>) -> SubscriptionId {
        let mut stream = self.register(TopicPattern::parse(sub.pattern()), false);
        let id = stream.id;
        let bus = self.clone();

        tokio::spawn(async move {
            while let Some(ev) = stream.recv().await {
                let fut = sub.on_event(ev.as_ref());
                let res = std::panic::AssertUnwindSafe(fut).catch_unwind().await;
                if let Err(panic_err) = res {
                    if !ev.is_subscriber_panic() {
                        let info = panic_message(&*panic_err);
                        bus.publish(Event::subscriber_panicked(sub.name(), info));
                    }
                }
            }
        });
        id
    }

    /// Removes a subscription. Its worker (if any) stops after draining queued events.
    ///
    /// Returns `false` if the id was unknown or already spent.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subs.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.read().iter().filter(|s| !s.is_spent()).count()
    }

    fn register(&self, pattern: TopicPattern, once: bool) -> EventStream {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subs.write().push(Subscription {
            id,
            pattern,
            once: once.then(|| AtomicBool::new(false)),
            tx,
        });
        EventStream { id, rx }
    }

    fn drive<F>(&self, mut stream: EventStream, name: &'static str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = stream.id;
        let bus = self.clone();
        tokio::spawn(async move {
            while let Some(ev) = stream.recv().await {
                let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(ev.as_ref())));
                if let Err(panic_err) = res {
                    if !ev.is_subscriber_panic() {
                        bus.publish(Event::subscriber_panicked(name, panic_message(&*panic_err)));
                    }
                }
            }
        });
        id
    }
}

/// Receiving end of a subscription.
///
/// Dropping the stream ends the subscription.
#[derive(Debug)]
pub struct EventStream {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Arc<Event>>,
}

impl EventStream {
    /// Subscription id (for [`Bus::unsubscribe`]).
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event. Returns `None` once unsubscribed (or after a `once` fired).
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }
}

fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_by_pattern_in_order() {
        let bus = Bus::new();
        let mut workers = bus.subscribe("worker:*");
        let mut online = bus.subscribe("cluster:online");

        bus.publish(Event::new(EventKind::WorkerForked));
        bus.publish(Event::new(EventKind::ProcessReady));
        bus.publish(Event::new(EventKind::WorkerReady));
        bus.publish(Event::new(EventKind::ClusterOnline));

        assert_eq!(workers.recv().await.unwrap().topic(), "worker:forked");
        assert_eq!(workers.recv().await.unwrap().topic(), "worker:ready");
        assert!(workers.try_recv().is_none());
        assert_eq!(online.recv().await.unwrap().kind, EventKind::ClusterOnline);
    }

    #[tokio::test]
    async fn once_fires_a_single_time() {
        let bus = Bus::new();
        let mut first = bus.subscribe_once("process:*");

        bus.publish(Event::new(EventKind::ProcessReady));
        bus.publish(Event::new(EventKind::ProcessExit));

        assert_eq!(first.recv().await.unwrap().kind, EventKind::ProcessReady);
        assert!(first.recv().await.is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_closes_stream() {
        let bus = Bus::new();
        let mut s = bus.subscribe("*");
        assert!(bus.unsubscribe(s.id()));
        assert!(!bus.unsubscribe(s.id()));
        bus.publish(Event::new(EventKind::BossShutdown));
        assert!(s.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_streams_are_pruned() {
        let bus = Bus::new();
        let s = bus.subscribe("*");
        drop(s);
        bus.publish(Event::new(EventKind::BossShutdown));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let bus = Bus::new();
        let mut panics = bus.subscribe("boss:subscriber:panicked");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        bus.on("process:ready", |_| panic!("boom"));
        bus.on("process:ready", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::new(EventKind::ProcessReady));
        bus.publish(Event::new(EventKind::ProcessReady));

        let ev = tokio::time::timeout(Duration::from_secs(2), panics.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(ev.reason.as_deref().unwrap().contains("boom"));

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn once_handler_runs_once() {
        let bus = Bus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        bus.once("cluster:online", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..3 {
            bus.publish(Event::new(EventKind::ClusterOnline));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
