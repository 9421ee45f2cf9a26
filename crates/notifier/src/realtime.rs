//! Realtime push channel: best-effort publish to connected subscribers.
//!
//! The subscriber registry is the single ownership boundary for connection
//! state: subscribe, unsubscribe and pruning of dead receivers all happen
//! here. A publish with nobody listening succeeds with no recipient; the
//! message is dropped, never queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use courier_common::error::ChannelError;
use courier_common::types::{Channel, DeliveryPolicy, Notification, NotificationKind, Priority};

/// Buffered messages per subscriber before a slow consumer starts dropping.
const SUBSCRIBER_BUFFER: usize = 64;

/// Payload pushed to realtime subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimePayload {
    pub notification_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for RealtimePayload {
    fn from(n: &Notification) -> Self {
        Self {
            notification_id: n.id,
            kind: n.kind,
            title: n.title.clone(),
            body: n.body.clone(),
            priority: n.priority,
            created_at: n.created_at,
        }
    }
}

/// Result of publishing to a per-user topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResult {
    /// Delivered to this many live subscribers.
    Delivered(usize),
    /// Nobody is listening.
    NoSubscriber,
}

/// Handle returned by `subscribe`; pass back to `unsubscribe` on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<RealtimePayload>,
}

/// Process-wide registry of connected realtime subscribers.
///
/// Populated on connect, pruned on disconnect or when a receiver is found
/// closed during publish.
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: Mutex<HashMap<Uuid, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a user's topic. The returned receiver gets
    /// every payload published for that user while registered.
    pub fn subscribe(&self, user_id: Uuid) -> (SubscriptionId, mpsc::Receiver<RealtimePayload>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .entry(user_id)
            .or_default()
            .push(Subscriber { id, tx });

        tracing::debug!(user_id = %user_id, "Realtime subscriber connected");
        (SubscriptionId(id), rx)
    }

    pub fn unsubscribe(&self, user_id: Uuid, subscription: SubscriptionId) {
        let mut inner = self.inner.lock();
        if let Some(subscribers) = inner.get_mut(&user_id) {
            subscribers.retain(|s| s.id != subscription.0);
            if subscribers.is_empty() {
                inner.remove(&user_id);
            }
        }
    }

    /// Live subscribers for a user (after pruning on the last publish).
    pub fn subscriber_count(&self, user_id: Uuid) -> usize {
        self.inner.lock().get(&user_id).map_or(0, Vec::len)
    }

    /// Publish a payload to every live subscriber of a user's topic.
    /// Closed receivers found here are pruned.
    pub fn publish(&self, user_id: Uuid, payload: RealtimePayload) -> PublishResult {
        let mut inner = self.inner.lock();
        let Some(subscribers) = inner.get_mut(&user_id) else {
            return PublishResult::NoSubscriber;
        };

        let mut delivered = 0usize;
        subscribers.retain(|subscriber| match subscriber.tx.try_send(payload.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            // A full buffer means a live but slow consumer; keep it.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if subscribers.is_empty() {
            inner.remove(&user_id);
        }

        if delivered == 0 {
            PublishResult::NoSubscriber
        } else {
            PublishResult::Delivered(delivered)
        }
    }
}

/// The realtime channel sender.
pub struct RealtimeSender {
    registry: Arc<SubscriberRegistry>,
}

impl RealtimeSender {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl crate::sender::ChannelSender for RealtimeSender {
    fn channel(&self) -> Channel {
        Channel::Realtime
    }

    fn policy(&self) -> DeliveryPolicy {
        DeliveryPolicy::BestEffort
    }

    async fn send(
        &self,
        notification: &Notification,
    ) -> Result<crate::sender::SendOutcome, ChannelError> {
        match self
            .registry
            .publish(notification.user_id, RealtimePayload::from(notification))
        {
            PublishResult::Delivered(subscribers) => {
                tracing::debug!(
                    notification_id = %notification.id,
                    subscribers,
                    "Realtime payload published"
                );
                Ok(crate::sender::SendOutcome::Delivered)
            }
            PublishResult::NoSubscriber => Ok(crate::sender::SendOutcome::NoSubscriber),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{ChannelSender, SendOutcome};
    use courier_common::types::NotificationStatus;

    fn make_notification(user_id: Uuid) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id,
            kind: NotificationKind::CommentMention,
            title: "Mentioned you".to_string(),
            body: "see comment".to_string(),
            priority: Priority::Low,
            channels: vec![Channel::Realtime],
            status: NotificationStatus::Pending,
            read: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let registry = SubscriberRegistry::new();
        let user = Uuid::new_v4();
        let (_id1, mut rx1) = registry.subscribe(user);
        let (_id2, mut rx2) = registry.subscribe(user);

        let payload = RealtimePayload::from(&make_notification(user));
        assert_eq!(registry.publish(user, payload), PublishResult::Delivered(2));

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let registry = SubscriberRegistry::new();
        let user = Uuid::new_v4();
        let payload = RealtimePayload::from(&make_notification(user));
        assert_eq!(registry.publish(user, payload), PublishResult::NoSubscriber);
    }

    #[tokio::test]
    async fn test_publish_is_per_user_topic() {
        let registry = SubscriberRegistry::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_id, mut alice_rx) = registry.subscribe(alice);

        let payload = RealtimePayload::from(&make_notification(bob));
        assert_eq!(registry.publish(bob, payload), PublishResult::NoSubscriber);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_topic() {
        let registry = SubscriberRegistry::new();
        let user = Uuid::new_v4();
        let (id, _rx) = registry.subscribe(user);
        assert_eq!(registry.subscriber_count(user), 1);

        registry.unsubscribe(user, id);
        assert_eq!(registry.subscriber_count(user), 0);

        let payload = RealtimePayload::from(&make_notification(user));
        assert_eq!(registry.publish(user, payload), PublishResult::NoSubscriber);
    }

    #[tokio::test]
    async fn test_dropped_receiver_pruned_on_publish() {
        let registry = SubscriberRegistry::new();
        let user = Uuid::new_v4();
        let (_id, rx) = registry.subscribe(user);
        drop(rx);

        let payload = RealtimePayload::from(&make_notification(user));
        assert_eq!(registry.publish(user, payload), PublishResult::NoSubscriber);
        assert_eq!(registry.subscriber_count(user), 0);
    }

    #[tokio::test]
    async fn test_sender_no_subscriber_is_success() {
        let registry = Arc::new(SubscriberRegistry::new());
        let sender = RealtimeSender::new(registry.clone());
        assert_eq!(sender.policy(), DeliveryPolicy::BestEffort);

        let outcome = sender.send(&make_notification(Uuid::new_v4())).await.unwrap();
        assert_eq!(outcome, SendOutcome::NoSubscriber);
    }

    #[tokio::test]
    async fn test_sender_delivers_to_connected_subscriber() {
        let registry = Arc::new(SubscriberRegistry::new());
        let sender = RealtimeSender::new(registry.clone());
        let user = Uuid::new_v4();
        let (_id, mut rx) = registry.subscribe(user);

        let notification = make_notification(user);
        let outcome = sender.send(&notification).await.unwrap();
        assert_eq!(outcome, SendOutcome::Delivered);

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.notification_id, notification.id);
        assert_eq!(payload.title, "Mentioned you");
    }
}
