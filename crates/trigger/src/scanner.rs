//! Deadline scanner: turns upcoming due dates into reminder notifications.
//!
//! A recurring scan asks the task source for everything due inside the
//! widest configured offset, then fires a reminder for each (task, offset)
//! pair whose window has opened and which the ledger has not seen before.
//! The ledger is marked before dispatch: a store outage can cost a reminder,
//! but a pair never fires twice.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use courier_common::error::AppError;
use courier_common::store::TaskSource;
use courier_common::types::{
    Channel, DispatchRequest, NotificationKind, Priority, UpcomingTask,
};
use courier_engine::dispatch::DispatchEngine;

use crate::ledger::ReminderLedger;

pub struct DeadlineScanner {
    tasks: Arc<dyn TaskSource>,
    ledger: Arc<dyn ReminderLedger>,
    engine: Arc<DispatchEngine>,
    /// Reminder offsets before the due time, widest first.
    offsets: Vec<Duration>,
    scan_interval: StdDuration,
}

impl DeadlineScanner {
    pub fn new(
        tasks: Arc<dyn TaskSource>,
        ledger: Arc<dyn ReminderLedger>,
        engine: Arc<DispatchEngine>,
        offset_hours: &[i64],
        scan_interval: StdDuration,
    ) -> Self {
        let mut offsets: Vec<Duration> = offset_hours.iter().map(|&h| Duration::hours(h)).collect();
        offsets.sort_by_key(|d| std::cmp::Reverse(*d));

        Self {
            tasks,
            ledger,
            engine,
            offsets,
            scan_interval,
        }
    }

    /// Start the scan loop. Runs until the task is cancelled. A failed scan
    /// is logged and retried on the next tick.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            offsets = ?self.offsets.iter().map(|d| d.num_hours()).collect::<Vec<_>>(),
            scan_interval_secs = self.scan_interval.as_secs(),
            "Deadline scanner started"
        );

        loop {
            match self.scan().await {
                Ok(fired) if fired > 0 => {
                    tracing::info!(fired, "Deadline reminders dispatched");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Deadline scan failed, will retry next tick");
                }
            }

            tokio::time::sleep(self.scan_interval).await;
        }
    }

    /// One pass over upcoming deadlines. Returns how many reminders fired.
    pub async fn scan(&self) -> Result<u32, AppError> {
        let Some(window) = self.offsets.first().copied() else {
            return Ok(0);
        };

        let tasks = self.tasks.list_upcoming_deadlines(window).await?;
        let now = Utc::now();
        let mut fired = 0u32;

        for task in &tasks {
            let remaining = task.due_at - now;
            if remaining <= Duration::zero() {
                continue;
            }

            for &offset in &self.offsets {
                if remaining > offset {
                    continue;
                }
                if !self.ledger.check_and_set(task.task_id, offset).await? {
                    continue;
                }

                match self.engine.dispatch(Self::reminder_request(task, offset)).await {
                    Ok(receipt) => {
                        tracing::info!(
                            task_id = %task.task_id,
                            offset_hours = offset.num_hours(),
                            notification_id = %receipt.notification_id,
                            "Deadline reminder fired"
                        );
                        fired += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            task_id = %task.task_id,
                            offset_hours = offset.num_hours(),
                            error = %e,
                            "Failed to dispatch deadline reminder"
                        );
                    }
                }
            }
        }

        Ok(fired)
    }

    fn reminder_request(task: &UpcomingTask, offset: Duration) -> DispatchRequest {
        // The final reminder before the deadline escalates.
        let priority = if offset <= Duration::hours(1) {
            Priority::Urgent
        } else {
            Priority::High
        };

        DispatchRequest {
            user_id: task.assignee,
            kind: NotificationKind::DeadlineReminder,
            title: format!("Due soon: {}", task.title),
            body: format!(
                "Task \"{}\" is due at {} (within {}).",
                task.title,
                task.due_at.format("%Y-%m-%d %H:%M UTC"),
                format_offset(offset),
            ),
            priority,
            channels: Channel::ALL.to_vec(),
        }
    }
}

fn format_offset(offset: Duration) -> String {
    if offset >= Duration::hours(1) {
        format!("{} hours", offset.num_hours())
    } else {
        format!("{} minutes", offset.num_minutes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::store::{
        MemoryNotificationStore, MemoryPreferenceStore, MemoryTaskSource, NotificationStore,
    };
    use courier_common::types::{NotificationFilter, NotificationStatus};
    use courier_engine::retry::RetryPolicy;
    use courier_notifier::realtime::{RealtimeSender, SubscriberRegistry};
    use courier_notifier::sender::ChannelSender;
    use uuid::Uuid;

    use crate::ledger::MemoryReminderLedger;

    struct Fixture {
        tasks: Arc<MemoryTaskSource>,
        ledger: Arc<MemoryReminderLedger>,
        store: Arc<MemoryNotificationStore>,
        registry: Arc<SubscriberRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tasks: Arc::new(MemoryTaskSource::new()),
                ledger: Arc::new(MemoryReminderLedger::new()),
                store: Arc::new(MemoryNotificationStore::new()),
                registry: Arc::new(SubscriberRegistry::new()),
            }
        }

        fn scanner(&self) -> DeadlineScanner {
            let senders: Vec<Arc<dyn ChannelSender>> =
                vec![Arc::new(RealtimeSender::new(self.registry.clone()))];
            let engine = Arc::new(DispatchEngine::new(
                self.store.clone(),
                Arc::new(MemoryPreferenceStore::new()),
                senders,
                RetryPolicy::default(),
                StdDuration::from_secs(1),
            ));
            DeadlineScanner::new(
                self.tasks.clone(),
                self.ledger.clone(),
                engine,
                &[24, 1],
                StdDuration::from_secs(60),
            )
        }

        fn add_task_due_in(&self, minutes: i64) -> UpcomingTask {
            let task = UpcomingTask {
                task_id: Uuid::new_v4(),
                title: "Ship the release".to_string(),
                assignee: Uuid::new_v4(),
                due_at: Utc::now() + Duration::minutes(minutes),
            };
            self.tasks.add_task(task.clone());
            task
        }
    }

    async fn reminders_for(
        store: &MemoryNotificationStore,
        user: Uuid,
    ) -> Vec<courier_common::types::Notification> {
        store
            .list_by_user(
                user,
                &NotificationFilter {
                    kind: Some(NotificationKind::DeadlineReminder),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_twice_fires_each_offset_once() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let task = fixture.add_task_due_in(30);

        // Due in 30 minutes: both the 24h and the 1h window are open.
        assert_eq!(scanner.scan().await.unwrap(), 2);
        // The second scan inside the window fires nothing.
        assert_eq!(scanner.scan().await.unwrap(), 0);

        let reminders = reminders_for(&fixture.store, task.assignee).await;
        assert_eq!(reminders.len(), 2);
    }

    #[tokio::test]
    async fn test_only_open_windows_fire() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let task = fixture.add_task_due_in(2 * 60);

        // Due in 2 hours: inside the 24h window, outside the 1h window.
        assert_eq!(scanner.scan().await.unwrap(), 1);

        let reminders = reminders_for(&fixture.store, task.assignee).await;
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].priority, Priority::High);
        assert!(reminders[0].body.contains("24 hours"));
    }

    #[tokio::test]
    async fn test_final_hour_reminder_is_urgent() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let task = fixture.add_task_due_in(45);

        scanner.scan().await.unwrap();
        let reminders = reminders_for(&fixture.store, task.assignee).await;
        assert!(
            reminders
                .iter()
                .any(|n| n.priority == Priority::Urgent && n.body.contains("1 hours"))
        );
    }

    #[tokio::test]
    async fn test_task_outside_all_windows_ignored() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        fixture.add_task_due_in(30 * 60);

        assert_eq!(scanner.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restart_does_not_refire_recorded_offsets() {
        let fixture = Fixture::new();
        let task = fixture.add_task_due_in(30);

        let scanner = fixture.scanner();
        assert_eq!(scanner.scan().await.unwrap(), 2);

        // A fresh scanner over the same ledger models a process restart.
        let restarted = fixture.scanner();
        assert_eq!(restarted.scan().await.unwrap(), 0);

        let reminders = reminders_for(&fixture.store, task.assignee).await;
        assert_eq!(reminders.len(), 2);
    }

    #[tokio::test]
    async fn test_reminder_reaches_connected_subscriber() {
        let fixture = Fixture::new();
        let scanner = fixture.scanner();
        let task = fixture.add_task_due_in(30);
        let (_id, mut rx) = fixture.registry.subscribe(task.assignee);

        scanner.scan().await.unwrap();

        let payload = tokio::time::timeout(StdDuration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.kind, NotificationKind::DeadlineReminder);
        assert!(payload.title.contains("Ship the release"));

        // Delivery state settles to delivered once the publish lands.
        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(2);
        loop {
            let n = fixture.store.get(payload.notification_id).await.unwrap().unwrap();
            if n.status == NotificationStatus::Delivered {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "never delivered");
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    }
}
