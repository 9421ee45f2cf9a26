use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channels for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Realtime,
}

impl Channel {
    /// Every channel the system knows about, in fan-out order.
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::Realtime];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Realtime => write!(f, "realtime"),
        }
    }
}

/// Per-channel retry eligibility.
///
/// Declared by each sender rather than branched on by channel kind, so a new
/// channel states its own durability when it is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Transient failures are retried with backoff until exhaustion.
    Durable,
    /// One attempt only; any failure is terminal for the channel.
    BestEffort,
}

/// Kinds of user-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskAssigned,
    DeadlineReminder,
    StatusChanged,
    CommentMention,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::TaskAssigned => write!(f, "task_assigned"),
            NotificationKind::DeadlineReminder => write!(f, "deadline_reminder"),
            NotificationKind::StatusChanged => write!(f, "status_changed"),
            NotificationKind::CommentMention => write!(f, "comment_mention"),
        }
    }
}

/// Notification priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Aggregate delivery status of a notification.
///
/// Transitions only move forward; terminal states are never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Persisted, no channel attempt has completed yet.
    Pending,
    /// At least one channel is still attempting or retrying.
    InProgress,
    /// At least one channel delivered.
    Delivered,
    /// Every requested channel exhausted its attempts.
    Failed,
    /// Preference resolution left no enabled channels; nothing was attempted.
    Skipped,
}

impl NotificationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NotificationStatus::Delivered | NotificationStatus::Failed | NotificationStatus::Skipped
        )
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Writing the same status twice is treated as a no-op elsewhere, so
    /// `self == next` is not a transition and returns false here.
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        match (self, next) {
            (Pending, InProgress)
            | (Pending, Delivered)
            | (Pending, Failed)
            | (Pending, Skipped) => true,
            (InProgress, Delivered) | (InProgress, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::InProgress => write!(f, "in_progress"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Failed => write!(f, "failed"),
            NotificationStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of the delivery attempts on one (notification, channel) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Pending,
    Delivered,
    Failed,
}

impl AttemptOutcome {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptOutcome::Delivered | AttemptOutcome::Failed)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Pending => write!(f, "pending"),
            AttemptOutcome::Delivered => write!(f, "delivered"),
            AttemptOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// A notification owned by the dispatch engine during delivery and persisted
/// in the notification store.
///
/// `read` is a user-facing flag mutated only through the mark-read API; it is
/// independent of the delivery `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    /// Effective channel set resolved at dispatch time. Later preference
    /// changes do not touch this.
    pub channels: Vec<Channel>,
    pub status: NotificationStatus,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Delivery bookkeeping for one (notification, channel) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAttempt {
    pub notification_id: Uuid,
    pub channel: Channel,
    /// Number of sends performed so far. Monotonically increasing.
    pub attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub outcome: AttemptOutcome,
}

impl ChannelAttempt {
    /// Fresh bookkeeping row created when a notification is persisted,
    /// before any send runs.
    pub fn initial(notification_id: Uuid, channel: Channel) -> Self {
        Self {
            notification_id,
            channel,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
            outcome: AttemptOutcome::Pending,
        }
    }
}

/// An incoming request to notify a user.
///
/// `channels` is what the caller asked for; the engine intersects it with the
/// user's preferences to obtain the effective set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub channels: Vec<Channel>,
}

/// What the submitter gets back. Delivery progress beyond this point is
/// observable only through the query APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub notification_id: Uuid,
    pub status: NotificationStatus,
    /// Channels that will actually be attempted.
    pub channels: Vec<Channel>,
}

/// Filters for listing a user's notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationFilter {
    pub kind: Option<NotificationKind>,
    pub status: Option<NotificationStatus>,
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

/// A task with an upcoming deadline, as reported by the task source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingTask {
    pub task_id: Uuid,
    pub title: String,
    pub assignee: Uuid,
    pub due_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(NotificationStatus::Delivered.is_terminal());
        assert!(NotificationStatus::Failed.is_terminal());
        assert!(NotificationStatus::Skipped.is_terminal());
        assert!(!NotificationStatus::Pending.is_terminal());
        assert!(!NotificationStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_forward_transitions_allowed() {
        use NotificationStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Delivered));
        assert!(Pending.can_transition_to(Skipped));
        assert!(InProgress.can_transition_to(Delivered));
        assert!(InProgress.can_transition_to(Failed));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        use NotificationStatus::*;
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Delivered.can_transition_to(InProgress));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Delivered));
        assert!(!Skipped.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Pending));
    }

    #[test]
    fn test_initial_attempt() {
        let id = Uuid::new_v4();
        let attempt = ChannelAttempt::initial(id, Channel::Email);
        assert_eq!(attempt.attempts, 0);
        assert_eq!(attempt.outcome, AttemptOutcome::Pending);
        assert!(attempt.next_retry_at.is_none());
        assert!(attempt.last_error.is_none());
    }
}
