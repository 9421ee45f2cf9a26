//! The dispatch engine: fan-out, outcome recording and status aggregation.
//!
//! One `dispatch` call resolves effective channels, persists the
//! notification, then fans out one worker task per channel. Channel workers
//! never block each other; transient failures on durable channels go back
//! through the retry scheduler. The submitter only ever sees an error when
//! the store itself is unreachable — delivery failures are contained here
//! and recorded for later querying.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use courier_common::error::{AppError, ChannelError};
use courier_common::store::{NotificationStore, PreferenceStore};
use courier_common::types::{
    AttemptOutcome, Channel, ChannelAttempt, DeliveryPolicy, DispatchReceipt, DispatchRequest,
    Notification, NotificationStatus,
};
use courier_notifier::sender::{ChannelSender, SendOutcome};

use crate::preferences::PreferenceResolver;
use crate::retry::{RetryPolicy, RetryScheduler};

/// What a finished attempt decided to do next. Computed while the in-flight
/// guard is held, acted on after it is released so the next send can claim
/// the pair.
enum AttemptPlan {
    Settled,
    Retry { delay: Duration, next_attempt: u32 },
}

pub struct DispatchEngine {
    store: Arc<dyn NotificationStore>,
    resolver: PreferenceResolver,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    policy: RetryPolicy,
    scheduler: RetryScheduler,
    send_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        preference_store: Arc<dyn PreferenceStore>,
        senders: Vec<Arc<dyn ChannelSender>>,
        policy: RetryPolicy,
        send_timeout: Duration,
    ) -> Self {
        let senders = senders
            .into_iter()
            .map(|sender| (sender.channel(), sender))
            .collect();

        Self {
            store,
            resolver: PreferenceResolver::new(preference_store),
            senders,
            policy,
            scheduler: RetryScheduler::new(),
            send_timeout,
        }
    }

    /// Accept a notification request, persist it, and start delivery.
    ///
    /// Returns once the notification is durably recorded; delivery continues
    /// in the background. An empty effective channel set is recorded as
    /// skipped and is not an error.
    pub async fn dispatch(
        self: &Arc<Self>,
        request: DispatchRequest,
    ) -> Result<DispatchReceipt, AppError> {
        let enabled = self
            .resolver
            .enabled_channels(request.user_id, request.kind)
            .await;

        let mut effective: Vec<Channel> = Vec::new();
        for channel in &request.channels {
            if enabled.contains(channel) && !effective.contains(channel) {
                effective.push(*channel);
            }
        }

        let status = if effective.is_empty() {
            NotificationStatus::Skipped
        } else {
            NotificationStatus::Pending
        };

        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            kind: request.kind,
            title: request.title,
            body: request.body,
            priority: request.priority,
            channels: effective.clone(),
            status,
            read: false,
            created_at: Utc::now(),
        };

        // The record must exist before any send so a crash mid-delivery
        // leaves an auditable pending row, not nothing.
        self.store.save(&notification).await?;

        if effective.is_empty() {
            tracing::info!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                kind = %notification.kind,
                "No enabled channels, notification skipped"
            );
            return Ok(DispatchReceipt {
                notification_id: notification.id,
                status,
                channels: effective,
            });
        }

        for channel in &effective {
            let engine = Arc::clone(self);
            let id = notification.id;
            let channel = *channel;
            tokio::spawn(async move {
                engine.run_attempt(id, channel, 1).await;
            });
        }

        tracing::info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            kind = %notification.kind,
            channels = effective.len(),
            "Notification dispatched"
        );

        Ok(DispatchReceipt {
            notification_id: notification.id,
            status,
            channels: effective,
        })
    }

    /// Perform one send for (notification, channel) and decide what follows.
    ///
    /// `attempt` is 1-based and counts this send. Re-submission after a
    /// transient failure goes through the scheduler; this function never
    /// loops inline.
    fn run_attempt(
        self: Arc<Self>,
        id: Uuid,
        channel: Channel,
        attempt: u32,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
        let plan = {
            let Some(_guard) = self.scheduler.try_begin(id, channel) else {
                tracing::warn!(
                    notification_id = %id,
                    channel = %channel,
                    "Send already in flight for this pair, skipping"
                );
                return;
            };

            self.attempt_once(id, channel, attempt).await
        };

        // Guard released: the pair can be claimed again. Aggregate first so
        // queries see the outcome before any retry fires.
        self.refresh_status(id).await;

        if let AttemptPlan::Retry {
            delay,
            next_attempt,
        } = plan
        {
            let engine = Arc::clone(&self);
            self.scheduler.schedule(delay, async move {
                engine.run_attempt(id, channel, next_attempt).await;
            });
        }
        })
    }

    /// The body of a single attempt, executed under the in-flight guard.
    async fn attempt_once(&self, id: Uuid, channel: Channel, attempt: u32) -> AttemptPlan {
        // Cooperative cancellation: re-read current state at the point of
        // dispatch. A deleted or already-settled notification aborts.
        let notification = match self.store.get(id).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                tracing::debug!(
                    notification_id = %id,
                    channel = %channel,
                    "Notification deleted, attempt aborted"
                );
                return AttemptPlan::Settled;
            }
            Err(e) => {
                tracing::warn!(
                    notification_id = %id,
                    channel = %channel,
                    error = %e,
                    "Store read failed before attempt, aborting"
                );
                return AttemptPlan::Settled;
            }
        };

        if notification.status.is_terminal() {
            return AttemptPlan::Settled;
        }

        if self.channel_settled(id, channel).await {
            return AttemptPlan::Settled;
        }

        let Some(sender) = self.senders.get(&channel) else {
            tracing::warn!(
                notification_id = %id,
                channel = %channel,
                "No sender configured for channel"
            );
            self.record(ChannelAttempt {
                notification_id: id,
                channel,
                attempts: attempt,
                next_retry_at: None,
                last_error: Some("no sender configured for channel".to_string()),
                outcome: AttemptOutcome::Failed,
            })
            .await;
            return AttemptPlan::Settled;
        };

        let result = match tokio::time::timeout(self.send_timeout, sender.send(&notification)).await
        {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Transient(format!(
                "send timed out after {:?}",
                self.send_timeout
            ))),
        };

        match result {
            Ok(outcome) => {
                if outcome == SendOutcome::NoSubscriber {
                    tracing::debug!(
                        notification_id = %id,
                        channel = %channel,
                        "No subscriber connected, payload dropped"
                    );
                }
                self.record(ChannelAttempt {
                    notification_id: id,
                    channel,
                    attempts: attempt,
                    next_retry_at: None,
                    last_error: None,
                    outcome: AttemptOutcome::Delivered,
                })
                .await;
                tracing::info!(
                    notification_id = %id,
                    channel = %channel,
                    attempt,
                    "Channel delivered"
                );
                AttemptPlan::Settled
            }
            Err(error) => {
                let retryable =
                    error.is_transient() && sender.policy() == DeliveryPolicy::Durable;

                if retryable && self.policy.should_retry(attempt) {
                    let delay = self.policy.delay_after_attempt(attempt);
                    self.record(ChannelAttempt {
                        notification_id: id,
                        channel,
                        attempts: attempt,
                        next_retry_at: Some(Utc::now() + delay),
                        last_error: Some(error.to_string()),
                        outcome: AttemptOutcome::Pending,
                    })
                    .await;
                    tracing::info!(
                        notification_id = %id,
                        channel = %channel,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient channel failure, retry scheduled"
                    );
                    AttemptPlan::Retry {
                        delay,
                        next_attempt: attempt + 1,
                    }
                } else {
                    self.record(ChannelAttempt {
                        notification_id: id,
                        channel,
                        attempts: attempt,
                        next_retry_at: None,
                        last_error: Some(error.to_string()),
                        outcome: AttemptOutcome::Failed,
                    })
                    .await;
                    tracing::warn!(
                        notification_id = %id,
                        channel = %channel,
                        attempt,
                        error = %error,
                        "Channel failed terminally"
                    );
                    AttemptPlan::Settled
                }
            }
        }
    }

    /// Whether this channel's attempt row has already reached a terminal
    /// outcome (no further sends allowed).
    async fn channel_settled(&self, id: Uuid, channel: Channel) -> bool {
        match self.store.attempts(id).await {
            Ok(attempts) => attempts
                .iter()
                .any(|a| a.channel == channel && a.outcome.is_terminal()),
            Err(e) => {
                tracing::warn!(
                    notification_id = %id,
                    channel = %channel,
                    error = %e,
                    "Attempt lookup failed, aborting send"
                );
                true
            }
        }
    }

    /// Write attempt bookkeeping; a store failure here must not corrupt
    /// in-memory delivery progress, so it is logged and delivery moves on.
    async fn record(&self, attempt: ChannelAttempt) {
        if let Err(e) = self.store.record_attempt(&attempt).await {
            tracing::warn!(
                notification_id = %attempt.notification_id,
                channel = %attempt.channel,
                error = %e,
                "Failed to record channel attempt"
            );
        }
    }

    /// Recompute the aggregate status from the channel attempt rows.
    ///
    /// Delivered wins as soon as one channel lands; failed requires every
    /// channel to be terminally failed; anything else still in motion is
    /// in-progress. The store's conditional update keeps transitions
    /// forward-only under concurrent outcomes.
    async fn refresh_status(&self, id: Uuid) {
        let attempts = match self.store.attempts(id).await {
            Ok(attempts) => attempts,
            Err(e) => {
                tracing::warn!(notification_id = %id, error = %e, "Status refresh read failed");
                return;
            }
        };
        if attempts.is_empty() {
            return;
        }

        let target = if attempts
            .iter()
            .any(|a| a.outcome == AttemptOutcome::Delivered)
        {
            NotificationStatus::Delivered
        } else if attempts.iter().all(|a| a.outcome == AttemptOutcome::Failed) {
            NotificationStatus::Failed
        } else {
            NotificationStatus::InProgress
        };

        if let Err(e) = self.store.update_status(id, target).await {
            tracing::warn!(
                notification_id = %id,
                status = %target,
                error = %e,
                "Status refresh write failed"
            );
        }
    }

    /// Outstanding sends across all notifications (for monitoring).
    pub fn inflight_sends(&self) -> usize {
        self.scheduler.inflight_count()
    }
}
