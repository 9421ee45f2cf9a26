//! In-memory store implementations.
//!
//! Same conditional-write semantics as the PostgreSQL implementations, held
//! behind a single lock so concurrent channel outcomes serialize per store.
//! Used by the test suites and for embedded runs without infrastructure.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::types::{
    Channel, ChannelAttempt, Notification, NotificationFilter, NotificationKind,
    NotificationStatus, UpcomingTask,
};

use super::{NotificationStore, PreferenceStore, TaskSource, UserDirectory};

struct NotificationEntry {
    notification: Notification,
    attempts: HashMap<Channel, ChannelAttempt>,
}

/// In-memory notification store.
#[derive(Default)]
pub struct MemoryNotificationStore {
    inner: Mutex<HashMap<Uuid, NotificationEntry>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn save(&self, notification: &Notification) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        inner.entry(notification.id).or_insert_with(|| {
            let attempts = notification
                .channels
                .iter()
                .map(|&channel| {
                    (channel, ChannelAttempt::initial(notification.id, channel))
                })
                .collect();
            NotificationEntry {
                notification: notification.clone(),
                attempts,
            }
        });
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: NotificationStatus) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get_mut(&id)
            && entry.notification.status.can_transition_to(status)
        {
            entry.notification.status = status;
        }
        Ok(())
    }

    async fn record_attempt(&self, attempt: &ChannelAttempt) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(&attempt.notification_id) else {
            return Ok(());
        };

        let current = entry
            .attempts
            .entry(attempt.channel)
            .or_insert_with(|| ChannelAttempt::initial(attempt.notification_id, attempt.channel));

        // Terminal rows are frozen; the counter never decreases.
        if current.outcome.is_terminal() {
            return Ok(());
        }
        let mut next = attempt.clone();
        next.attempts = next.attempts.max(current.attempts);
        *current = next;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        Ok(self
            .inner
            .lock()
            .get(&id)
            .map(|entry| entry.notification.clone()))
    }

    async fn attempts(&self, id: Uuid) -> Result<Vec<ChannelAttempt>, AppError> {
        let inner = self.inner.lock();
        let Some(entry) = inner.get(&id) else {
            return Ok(Vec::new());
        };

        Ok(entry
            .notification
            .channels
            .iter()
            .filter_map(|channel| entry.attempts.get(channel).cloned())
            .collect())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>, AppError> {
        let inner = self.inner.lock();
        let mut result: Vec<Notification> = inner
            .values()
            .map(|entry| &entry.notification)
            .filter(|n| n.user_id == user_id)
            .filter(|n| filter.kind.is_none_or(|kind| n.kind == kind))
            .filter(|n| filter.status.is_none_or(|status| n.status == status))
            .filter(|n| !filter.unread_only || !n.read)
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(filter.limit.unwrap_or(100).max(0) as usize);
        Ok(result)
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .inner
            .lock()
            .values()
            .filter(|entry| entry.notification.user_id == user_id && !entry.notification.read)
            .count() as i64)
    }

    async fn mark_read(&self, id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.lock();
        match inner.get_mut(&id) {
            Some(entry) => {
                entry.notification.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.inner.lock().remove(&id).is_some())
    }
}

/// In-memory preference store.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    inner: Mutex<HashMap<(Uuid, NotificationKind), Vec<Channel>>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
    ) -> Result<Option<Vec<Channel>>, AppError> {
        Ok(self.inner.lock().get(&(user_id, kind)).cloned())
    }

    async fn set(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        channels: &[Channel],
    ) -> Result<(), AppError> {
        self.inner.lock().insert((user_id, kind), channels.to_vec());
        Ok(())
    }
}

/// In-memory task source. Tests seed it with `add_task`.
#[derive(Default)]
pub struct MemoryTaskSource {
    tasks: Mutex<Vec<UpcomingTask>>,
}

impl MemoryTaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, task: UpcomingTask) {
        self.tasks.lock().push(task);
    }
}

#[async_trait]
impl TaskSource for MemoryTaskSource {
    async fn list_upcoming_deadlines(
        &self,
        window: Duration,
    ) -> Result<Vec<UpcomingTask>, AppError> {
        let now = Utc::now();
        let horizon = now + window;
        Ok(self
            .tasks
            .lock()
            .iter()
            .filter(|task| task.due_at > now && task.due_at <= horizon)
            .cloned()
            .collect())
    }
}

/// In-memory user directory. Tests seed it with `insert`.
#[derive(Default)]
pub struct MemoryUserDirectory {
    emails: Mutex<HashMap<Uuid, String>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: Uuid, email: impl Into<String>) {
        self.emails.lock().insert(user_id, email.into());
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn email_of(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        Ok(self.emails.lock().get(&user_id).cloned())
    }
}
