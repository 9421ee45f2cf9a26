//! Fired-offset ledger for deadline reminders.
//!
//! Each (task, offset) pair fires at most once. The production ledger uses
//! Redis `SET NX` with no expiry for an atomic first-fire check that
//! survives process restarts; the in-memory ledger backs the tests.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use courier_common::error::AppError;

/// Durable record of which reminder offsets have already fired.
#[async_trait]
pub trait ReminderLedger: Send + Sync {
    /// Atomically mark (task, offset) as fired. Returns `true` when this
    /// call was the first to fire the pair, `false` when it already fired.
    async fn check_and_set(&self, task_id: Uuid, offset: Duration) -> Result<bool, AppError>;
}

/// Redis-backed ledger.
pub struct RedisReminderLedger {
    redis: ConnectionManager,
}

impl RedisReminderLedger {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(task_id: Uuid, offset: Duration) -> String {
        format!("reminder:fired:{}:{}s", task_id, offset.num_seconds())
    }
}

#[async_trait]
impl ReminderLedger for RedisReminderLedger {
    async fn check_and_set(&self, task_id: Uuid, offset: Duration) -> Result<bool, AppError> {
        let key = Self::key(task_id, offset);
        let mut conn = self.redis.clone();

        // SET key "1" NX, deliberately without a TTL: the fired record must
        // outlive the reminder window and any process restart.
        // Returns Some("OK") if the key was set (first fire), None otherwise.
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }
}

/// In-memory ledger for tests and embedded runs.
#[derive(Default)]
pub struct MemoryReminderLedger {
    fired: Mutex<HashSet<(Uuid, i64)>>,
}

impl MemoryReminderLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReminderLedger for MemoryReminderLedger {
    async fn check_and_set(&self, task_id: Uuid, offset: Duration) -> Result<bool, AppError> {
        Ok(self.fired.lock().insert((task_id, offset.num_seconds())))
    }
}
