//! Fan-out of change events to connected subscribers.
//!
//! Each subscriber owns a bounded outbound queue. Publishing encodes a
//! change once and offers the frame to every queue with `try_send`, so a
//! slow or dead subscriber never holds up the others: a full queue drops
//! the frame for that subscriber only, and a closed queue is removed from
//! the set.

use std::sync::Arc;

use cg_core::{FxHashMap, FxHashSet, fx_hash_map, fx_hash_set};
use cg_watcher::{ChangeEvent, FileWatcher, WatchEvent};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::BroadcastError;
use crate::protocol::{ChangeMessage, DEFAULT_TOPIC, Envelope, ServerMessage};

/// Outbound queue length used by [`ChangeBroadcaster::default`].
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<Arc<str>>,
    /// Empty means every topic.
    topics: FxHashSet<String>,
}

impl Subscriber {
    fn wants(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.contains(topic)
    }
}

struct Inner {
    subscribers: RwLock<FxHashMap<Uuid, Subscriber>>,
    buffer: usize,
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    /// Subscribers whose queue accepted the frame.
    pub delivered: usize,
    /// Subscribers skipped by their topic filter.
    pub filtered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
    /// Subscribers found closed and removed.
    pub removed: usize,
}

/// Pushes change events to every live subscription.
///
/// Cloning shares the same subscriber set.
///
/// # Examples
///
/// ```
/// use cg_broadcast::ChangeBroadcaster;
/// use cg_watcher::{ChangeEvent, ChangeKind};
///
/// # async fn example() -> Result<(), cg_broadcast::BroadcastError> {
/// let broadcaster = ChangeBroadcaster::new(16);
/// let mut subscription = broadcaster.register();
///
/// let report = broadcaster.publish(&ChangeEvent::new("/data/a.json".into(), ChangeKind::Change))?;
/// assert_eq!(report.delivered, 1);
///
/// let frame = subscription.recv().await.unwrap();
/// assert!(frame.contains("\"type\":\"change\""));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChangeBroadcaster {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChangeBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .field("buffer", &self.inner.buffer)
            .finish()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_BUFFER)
    }
}

impl ChangeBroadcaster {
    /// Creates a broadcaster whose subscribers each queue up to `buffer` frames.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(fx_hash_map()),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Adds a subscriber with an empty topic filter.
    ///
    /// The subscriber is removed when the returned [`Subscription`] is dropped.
    #[must_use]
    pub fn register(&self) -> Subscription {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner.subscribers.write().insert(
            client_id,
            Subscriber {
                tx,
                topics: fx_hash_set(),
            },
        );
        tracing::debug!(client_id = %client_id, "Subscriber registered");

        Subscription {
            client_id,
            rx,
            broadcaster: self.clone(),
        }
    }

    /// Adds `topics` to a subscriber's filter. Returns `false` for an unknown id.
    pub fn subscribe_topics<I>(&self, client_id: Uuid, topics: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let mut subscribers = self.inner.subscribers.write();
        let Some(subscriber) = subscribers.get_mut(&client_id) else {
            return false;
        };
        subscriber.topics.extend(topics);
        tracing::debug!(client_id = %client_id, topics = ?subscriber.topics, "Topics subscribed");
        true
    }

    /// Removes `topics` from a subscriber's filter. Returns `false` for an unknown id.
    ///
    /// Removing the last topic returns the subscriber to receiving everything.
    pub fn unsubscribe_topics<I>(&self, client_id: Uuid, topics: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let mut subscribers = self.inner.subscribers.write();
        let Some(subscriber) = subscribers.get_mut(&client_id) else {
            return false;
        };
        for topic in topics {
            subscriber.topics.remove(&topic);
        }
        tracing::debug!(client_id = %client_id, topics = ?subscriber.topics, "Topics unsubscribed");
        true
    }

    /// Publishes `event` on the default topic.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Encode`] if the frame cannot be serialized.
    pub fn publish(&self, event: &ChangeEvent) -> Result<DeliveryReport, BroadcastError> {
        self.publish_to(DEFAULT_TOPIC, event)
    }

    /// Publishes `event` on `topic` to every interested subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Encode`] if the frame cannot be serialized.
    pub fn publish_to(
        &self,
        topic: &str,
        event: &ChangeEvent,
    ) -> Result<DeliveryReport, BroadcastError> {
        let message = ServerMessage::Change(ChangeMessage::from_event(topic, event));
        let frame: Arc<str> = Envelope::now(message).encode()?.into();

        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();
        {
            let subscribers = self.inner.subscribers.read();
            for (client_id, subscriber) in subscribers.iter() {
                if !subscriber.wants(topic) {
                    report.filtered += 1;
                    continue;
                }
                match subscriber.tx.try_send(Arc::clone(&frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(client_id = %client_id, path = %event.path, "Subscriber queue full, dropping change");
                        report.dropped += 1;
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*client_id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for client_id in &closed {
                subscribers.remove(client_id);
                tracing::debug!(client_id = %client_id, "Removed closed subscriber");
            }
            report.removed = closed.len();
        }

        tracing::debug!(
            topic,
            path = %event.path,
            kind = %event.kind,
            delivered = report.delivered,
            dropped = report.dropped,
            "Change published"
        );
        Ok(report)
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Forwards watcher output until `cancel` fires or the watcher stops.
    ///
    /// Changes are published on the default topic. Diagnostics are logged and
    /// never reach subscribers.
    pub async fn pump(&self, watcher: &mut FileWatcher, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = watcher.recv() => match event {
                    Some(WatchEvent::Changed(change)) => {
                        if let Err(e) = self.publish(&change) {
                            tracing::error!(path = %change.path, error = %e, "Failed to publish change");
                        }
                    }
                    Some(WatchEvent::Diagnostic(message)) => {
                        tracing::warn!(diagnostic = %message, "Watcher reported an error");
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("Broadcast pump stopped");
    }

    fn unregister(&self, client_id: Uuid) {
        if self.inner.subscribers.write().remove(&client_id).is_some() {
            tracing::debug!(client_id = %client_id, "Subscriber unregistered");
        }
    }
}

/// A registered subscriber's receiving end.
///
/// Frames arrive pre-encoded as JSON text. Dropping the subscription
/// unregisters it.
pub struct Subscription {
    client_id: Uuid,
    rx: mpsc::Receiver<Arc<str>>,
    broadcaster: ChangeBroadcaster,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Returns the id assigned at registration.
    #[must_use]
    pub const fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Receives the next frame.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.client_id);
    }
}
