//! Narrow persistence seams consumed by the dispatch engine, trigger and API.
//!
//! Each trait has a PostgreSQL implementation (production) and an in-memory
//! implementation (tests, embedded runs). The engine only ever sees the
//! trait objects, so delivery logic is independent of the storage engine.

mod memory;
mod postgres;

pub use memory::{
    MemoryNotificationStore, MemoryPreferenceStore, MemoryTaskSource, MemoryUserDirectory,
};
pub use postgres::{PgNotificationStore, PgPreferenceStore, PgTaskSource, PgUserDirectory};

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::types::{
    Channel, ChannelAttempt, Notification, NotificationFilter, NotificationKind,
    NotificationStatus, UpcomingTask,
};

/// Durable record of notification state and per-channel delivery history.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new notification together with one pending attempt row per
    /// effective channel. Saving the same id twice is a no-op.
    ///
    /// This runs before any delivery attempt so a record exists even if the
    /// process dies mid-send.
    async fn save(&self, notification: &Notification) -> Result<(), AppError>;

    /// Move the aggregate status forward. Conditional on the current state:
    /// a write that is not a legal forward transition (including writing the
    /// current status again) is silently ignored, so duplicate and stale
    /// outcome events cannot corrupt state.
    async fn update_status(&self, id: Uuid, status: NotificationStatus) -> Result<(), AppError>;

    /// Record the latest bookkeeping for one (notification, channel) pair.
    ///
    /// Once the pair's outcome is terminal the row is frozen: further writes
    /// are ignored. The attempt counter never decreases.
    async fn record_attempt(&self, attempt: &ChannelAttempt) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError>;

    /// All attempt rows for a notification, in its channel fan-out order.
    async fn attempts(&self, id: Uuid) -> Result<Vec<ChannelAttempt>, AppError>;

    async fn list_by_user(
        &self,
        user_id: Uuid,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>, AppError>;

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError>;

    /// Returns false if the notification does not exist.
    async fn mark_read(&self, id: Uuid) -> Result<bool, AppError>;

    /// Returns false if the notification does not exist. Pending retries for
    /// a deleted notification abort as no-ops at their next status check.
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
}

/// Per-user, per-kind channel preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// `None` means no explicit preference is recorded; the resolver treats
    /// that as all channels enabled.
    async fn get(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
    ) -> Result<Option<Vec<Channel>>, AppError>;

    async fn set(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        channels: &[Channel],
    ) -> Result<(), AppError>;
}

/// Read-only view of tasks with upcoming deadlines, consumed by the
/// deadline trigger.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Open tasks due within `window` from now.
    async fn list_upcoming_deadlines(&self, window: Duration)
    -> Result<Vec<UpcomingTask>, AppError>;
}

/// Resolves a user id to an email address for the email channel.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `None` when the user exists but has no address on file (a permanent
    /// delivery failure for the email channel).
    async fn email_of(&self, user_id: Uuid) -> Result<Option<String>, AppError>;
}
