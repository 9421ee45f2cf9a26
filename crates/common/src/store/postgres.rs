//! PostgreSQL-backed store implementations.
//!
//! All writes that race (status aggregation, attempt outcomes) are
//! conditional at the SQL level, so concurrent channel workers cannot lose
//! updates or resurrect terminal state.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::types::{
    AttemptOutcome, Channel, ChannelAttempt, Notification, NotificationFilter, NotificationKind,
    NotificationStatus, Priority, UpcomingTask,
};

use super::{NotificationStore, PreferenceStore, TaskSource, UserDirectory};

/// Notification store backed by the `notifications` / `channel_attempts`
/// tables.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    kind: NotificationKind,
    title: String,
    body: String,
    priority: Priority,
    channels: serde_json::Value,
    status: NotificationStatus,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl NotificationRow {
    fn into_notification(self) -> Result<Notification, AppError> {
        let channels: Vec<Channel> = serde_json::from_value(self.channels)
            .map_err(|e| AppError::Internal(format!("corrupt channels column: {}", e)))?;
        Ok(Notification {
            id: self.id,
            user_id: self.user_id,
            kind: self.kind,
            title: self.title,
            body: self.body,
            priority: self.priority,
            channels,
            status: self.status,
            read: self.is_read,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    notification_id: Uuid,
    channel: Channel,
    attempts: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    outcome: AttemptOutcome,
}

impl From<AttemptRow> for ChannelAttempt {
    fn from(row: AttemptRow) -> Self {
        ChannelAttempt {
            notification_id: row.notification_id,
            channel: row.channel,
            attempts: row.attempts.max(0) as u32,
            next_retry_at: row.next_retry_at,
            last_error: row.last_error,
            outcome: row.outcome,
        }
    }
}

/// Source states from which a transition to `status` is legal. Used to make
/// the status UPDATE conditional in SQL.
fn allowed_sources(status: NotificationStatus) -> Vec<String> {
    use NotificationStatus::*;
    let sources: &[NotificationStatus] = match status {
        InProgress | Skipped => &[Pending],
        Delivered | Failed => &[Pending, InProgress],
        Pending => &[],
    };
    sources.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn save(&self, notification: &Notification) -> Result<(), AppError> {
        let channels = serde_json::to_value(&notification.channels)
            .map_err(|e| AppError::Internal(format!("serialize channels: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, body, priority, channels, status, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.kind.to_string())
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.priority.to_string())
        .bind(&channels)
        .bind(notification.status.to_string())
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        for channel in &notification.channels {
            sqlx::query(
                r#"
                INSERT INTO channel_attempts (notification_id, channel, attempts, outcome)
                VALUES ($1, $2, 0, 'pending')
                ON CONFLICT (notification_id, channel) DO NOTHING
                "#,
            )
            .bind(notification.id)
            .bind(channel.to_string())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: NotificationStatus) -> Result<(), AppError> {
        let sources = allowed_sources(status);
        if sources.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE notifications SET status = $2 WHERE id = $1 AND status = ANY($3)")
            .bind(id)
            .bind(status.to_string())
            .bind(&sources)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_attempt(&self, attempt: &ChannelAttempt) -> Result<(), AppError> {
        // The WHERE guard freezes terminal rows and GREATEST keeps the
        // counter monotonic, making duplicate outcome events no-ops.
        sqlx::query(
            r#"
            INSERT INTO channel_attempts (notification_id, channel, attempts, next_retry_at, last_error, outcome)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (notification_id, channel) DO UPDATE
            SET attempts = GREATEST(channel_attempts.attempts, EXCLUDED.attempts),
                next_retry_at = EXCLUDED.next_retry_at,
                last_error = EXCLUDED.last_error,
                outcome = EXCLUDED.outcome
            WHERE channel_attempts.outcome = 'pending'
            "#,
        )
        .bind(attempt.notification_id)
        .bind(attempt.channel.to_string())
        .bind(attempt.attempts as i32)
        .bind(attempt.next_retry_at)
        .bind(&attempt.last_error)
        .bind(attempt.outcome.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let row: Option<NotificationRow> =
            sqlx::query_as("SELECT * FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(NotificationRow::into_notification).transpose()
    }

    async fn attempts(&self, id: Uuid) -> Result<Vec<ChannelAttempt>, AppError> {
        let rows: Vec<AttemptRow> = sqlx::query_as(
            "SELECT * FROM channel_attempts WHERE notification_id = $1 ORDER BY channel",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChannelAttempt::from).collect())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>, AppError> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT * FROM notifications
            WHERE user_id = $1
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR status = $3)
              AND (NOT $4 OR is_read = false)
            ORDER BY created_at DESC
            LIMIT $5
            "#,
        )
        .bind(user_id)
        .bind(filter.kind.map(|k| k.to_string()))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.unread_only)
        .bind(filter.limit.unwrap_or(100))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(NotificationRow::into_notification)
            .collect()
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn mark_read(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE notifications SET is_read = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Preference store backed by the `channel_preferences` table.
#[derive(Clone)]
pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn get(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
    ) -> Result<Option<Vec<Channel>>, AppError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT channels FROM channel_preferences WHERE user_id = $1 AND kind = $2",
        )
        .bind(user_id)
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(value,)| {
            serde_json::from_value(value)
                .map_err(|e| AppError::Internal(format!("corrupt preference row: {}", e)))
        })
        .transpose()
    }

    async fn set(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        channels: &[Channel],
    ) -> Result<(), AppError> {
        let value = serde_json::to_value(channels)
            .map_err(|e| AppError::Internal(format!("serialize preference: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO channel_preferences (user_id, kind, channels, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, kind) DO UPDATE
            SET channels = EXCLUDED.channels, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(kind.to_string())
        .bind(&value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Task source backed by the `tasks` table.
#[derive(Clone)]
pub struct PgTaskSource {
    pool: PgPool,
}

impl PgTaskSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskSource for PgTaskSource {
    async fn list_upcoming_deadlines(
        &self,
        window: Duration,
    ) -> Result<Vec<UpcomingTask>, AppError> {
        let rows: Vec<(Uuid, String, Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, title, assignee, due_at FROM tasks
            WHERE completed = false
              AND due_at > NOW()
              AND due_at <= NOW() + make_interval(secs => $1::float8)
            ORDER BY due_at
            "#,
        )
        .bind(window.num_seconds() as f64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(task_id, title, assignee, due_at)| UpcomingTask {
                task_id,
                title,
                assignee,
                due_at,
            })
            .collect())
    }
}

/// Recipient address lookup backed by the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn email_of(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(email,)| email))
    }
}
