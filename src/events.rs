//! The event bus (C9): a topic-keyed publish/subscribe channel the
//! executor uses to report per-operation progress. Generalized from a
//! single progress-tracker channel into a multi-topic bus with typed
//! payloads, passed explicitly by the caller rather than read from
//! ambient state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::descriptor::{DetailValue, OperationKind};
use crate::id::OperationId;

pub const TOPIC_STARTED: &str = "operation.started";
pub const TOPIC_COMPLETED: &str = "operation.completed";
pub const TOPIC_FAILED: &str = "operation.failed";
/// Advisory topic (§7's `backup_rejected`): published when a
/// restorable run's budget rejects an operation's backup capture. Never
/// fails the run — see `BackupBudget::consume`.
pub const TOPIC_BACKUP_REJECTED: &str = "operation.backup_rejected";

/// The payload carried by every built-in event topic (§6).
#[derive(Debug, Clone)]
pub struct EventPayload {
    pub op_id: OperationId,
    pub op_kind: OperationKind,
    pub path: std::path::PathBuf,
    pub details: BTreeMap<String, DetailValue>,
    pub timestamp: SystemTime,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    /// Set only on `TOPIC_BACKUP_REJECTED`: the MB this capture wanted
    /// and the MB the budget had left when it was rejected.
    pub wanted_mb: Option<f64>,
    pub remaining_mb: Option<f64>,
}

impl EventPayload {
    pub fn new(op_id: OperationId, op_kind: OperationKind, path: std::path::PathBuf) -> Self {
        Self {
            op_id,
            op_kind,
            path,
            details: BTreeMap::new(),
            timestamp: SystemTime::now(),
            duration: None,
            error: None,
            wanted_mb: None,
            remaining_mb: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_backup_rejected(mut self, wanted_mb: f64, remaining_mb: f64) -> Self {
        self.wanted_mb = Some(wanted_mb);
        self.remaining_mb = Some(remaining_mb);
        self
    }
}

/// One published event: a topic name plus its payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: EventPayload,
}

/// A token returned by [`EventBus::subscribe`]; pass it back to
/// [`EventBus::unsubscribe`] to stop receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) -> Result<(), String> + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    topic: String,
    handler: Handler,
}

/// A topic-keyed pub/sub bus. Read access (the snapshot taken before
/// invoking handlers) and write access (subscribe/unsubscribe) are
/// split across a reader/writer lock, matching the concurrency policy
/// in §5: concurrent subscribe/publish is supported, handler execution
/// itself is the handler's concern.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("subscriber_count", &count).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `topic`. Handlers for one topic never
    /// receive events for another.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&Event) -> Result<(), String> + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write().expect("event bus lock poisoned");
        subscribers.push(Subscriber { id, topic: topic.into(), handler: Arc::new(handler) });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().expect("event bus lock poisoned");
        subscribers.retain(|s| s.id != id);
    }

    /// Invoke every subscriber for `event.topic`, in subscription
    /// order, synchronously. Handler errors are logged and do not stop
    /// delivery to the remaining subscribers.
    pub fn publish(&self, event: Event) {
        let snapshot: Vec<Handler> = {
            let subscribers = self.subscribers.read().expect("event bus lock poisoned");
            subscribers.iter().filter(|s| s.topic == event.topic).map(|s| s.handler.clone()).collect()
        };
        for handler in snapshot {
            if let Err(err) = handler(&event) {
                warn!(topic = %event.topic, error = %err, "event handler failed");
            }
        }
    }

    /// Schedule the same delivery as [`Self::publish`] to run
    /// independently of the caller's thread of control. Delivery order
    /// across separate `publish_async` calls is not guaranteed.
    pub fn publish_async(self: &Arc<Self>, event: Event) {
        let bus = Arc::clone(self);
        std::thread::spawn(move || bus.publish(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample_event(topic: &str) -> Event {
        Event {
            topic: topic.to_string(),
            payload: EventPayload::new(
                OperationId::new("op1").unwrap(),
                OperationKind::CreateFile,
                "a.txt".into(),
            ),
        }
    }

    #[test]
    fn publish_invokes_subscribers_for_matching_topic_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        bus.subscribe(TOPIC_STARTED, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.publish(sample_event(TOPIC_STARTED));
        bus.publish(sample_event(TOPIC_COMPLETED));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let id = bus.subscribe(TOPIC_STARTED, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.unsubscribe(id);
        bus.publish(sample_event(TOPIC_STARTED));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_failing_handler_does_not_block_the_next_one() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(TOPIC_STARTED, |_| Err("boom".to_string()));
        let hits2 = Arc::clone(&hits);
        bus.subscribe(TOPIC_STARTED, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.publish(sample_event(TOPIC_STARTED));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
