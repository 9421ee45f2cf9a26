//! The channel sender capability: one delivery attempt on one channel.
//!
//! Senders are stateless and never retry internally; classification of a
//! failure (transient vs permanent) and the retry loop live in the dispatch
//! engine. Each sender also declares its delivery policy so the engine knows
//! whether transient failures on that channel are worth retrying at all.

use async_trait::async_trait;

use courier_common::error::ChannelError;
use courier_common::types::{Channel, DeliveryPolicy, Notification};

/// Result of a successful delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The channel accepted the message.
    Delivered,
    /// Nobody was listening on a best-effort channel. Counts as success;
    /// the message is not queued for later.
    NoSubscriber,
}

/// A single delivery attempt for one notification on one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    fn policy(&self) -> DeliveryPolicy;

    async fn send(&self, notification: &Notification) -> Result<SendOutcome, ChannelError>;
}
