//! Channel-appropriate rendering of notification content.

use courier_common::types::{Notification, NotificationKind, Priority};

/// Render the email subject line for a notification.
///
/// Urgent notifications get an explicit marker; the kind supplies a short
/// bracketed tag so mail clients group related subjects.
pub fn render_subject(notification: &Notification) -> String {
    let tag = match notification.kind {
        NotificationKind::TaskAssigned => "Task",
        NotificationKind::DeadlineReminder => "Reminder",
        NotificationKind::StatusChanged => "Update",
        NotificationKind::CommentMention => "Mention",
    };

    if notification.priority == Priority::Urgent {
        format!("[{}] URGENT: {}", tag, notification.title)
    } else {
        format!("[{}] {}", tag, notification.title)
    }
}

/// Render the plain-text email body for a notification.
pub fn render_email_body(notification: &Notification) -> String {
    let lead = match notification.kind {
        NotificationKind::TaskAssigned => "You have been assigned a task.",
        NotificationKind::DeadlineReminder => "A task you are assigned to is due soon.",
        NotificationKind::StatusChanged => "A task you follow changed status.",
        NotificationKind::CommentMention => "You were mentioned in a comment.",
    };

    format!(
        "{}\n\n{}\n\nPriority: {}\n",
        lead, notification.body, notification.priority
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_common::types::{Channel, NotificationStatus};
    use uuid::Uuid;

    fn make_notification(kind: NotificationKind, priority: Priority) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind,
            title: "Fix login flow".to_string(),
            body: "The login page 500s on empty passwords".to_string(),
            priority,
            channels: vec![Channel::Email],
            status: NotificationStatus::Pending,
            read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_subject_tags_by_kind() {
        let n = make_notification(NotificationKind::TaskAssigned, Priority::Medium);
        assert_eq!(render_subject(&n), "[Task] Fix login flow");

        let n = make_notification(NotificationKind::DeadlineReminder, Priority::Medium);
        assert_eq!(render_subject(&n), "[Reminder] Fix login flow");

        let n = make_notification(NotificationKind::CommentMention, Priority::Medium);
        assert_eq!(render_subject(&n), "[Mention] Fix login flow");
    }

    #[test]
    fn test_urgent_subject_marker() {
        let n = make_notification(NotificationKind::StatusChanged, Priority::Urgent);
        assert_eq!(render_subject(&n), "[Update] URGENT: Fix login flow");
    }

    #[test]
    fn test_body_contains_message_and_priority() {
        let n = make_notification(NotificationKind::CommentMention, Priority::High);
        let body = render_email_body(&n);
        assert!(body.contains("mentioned in a comment"));
        assert!(body.contains("The login page 500s on empty passwords"));
        assert!(body.contains("Priority: high"));
    }
}
