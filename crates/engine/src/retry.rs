//! Retry policy and the delayed re-submission scheduler.
//!
//! Backoff is a pure function of the attempt count; scheduling is an
//! explicit delayed task keyed by (notification, channel), independent of
//! any scheduling framework. The in-flight guard enforces the core
//! concurrency invariant: at most one outstanding send per
//! (notification, channel) pair at any time.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use courier_common::config::AppConfig;
use courier_common::types::Channel;

/// Exponential backoff configuration for durable channels.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied for each further failed attempt.
    pub backoff_factor: u32,
    /// Total sends allowed per (notification, channel), including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            backoff_factor: 5,
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(config.retry_base_delay_secs),
            backoff_factor: config.retry_backoff_factor,
            max_attempts: config.retry_max_attempts,
        }
    }

    /// Whether another send may follow after `attempts` have been performed.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay between attempt number `attempts` (1-based, already performed)
    /// and the next one: `base * factor^(attempts - 1)`.
    pub fn delay_after_attempt(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        self.base_delay
            .saturating_mul(self.backoff_factor.saturating_pow(exponent))
    }
}

/// Claim on a (notification, channel) pair while a send is outstanding.
/// Dropping it releases the pair.
pub struct InflightGuard<'a> {
    scheduler: &'a RetryScheduler,
    notification_id: Uuid,
    channel: Channel,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.scheduler
            .inflight
            .lock()
            .remove(&(self.notification_id, self.channel));
    }
}

/// Tracks outstanding sends and runs delayed re-submissions.
#[derive(Default)]
pub struct RetryScheduler {
    inflight: Mutex<HashSet<(Uuid, Channel)>>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pair for a send. Returns `None` if a send for the same pair
    /// is already outstanding, in which case the caller must not send.
    pub fn try_begin(&self, notification_id: Uuid, channel: Channel) -> Option<InflightGuard<'_>> {
        if self.inflight.lock().insert((notification_id, channel)) {
            Some(InflightGuard {
                scheduler: self,
                notification_id,
                channel,
            })
        } else {
            None
        }
    }

    /// Run `task` after `delay` as an independently scheduled unit of work.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }

    /// Number of currently outstanding sends (for monitoring and tests).
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}
