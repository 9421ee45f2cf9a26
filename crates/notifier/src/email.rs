//! Email channel: durable delivery through an outbound mail transport.
//!
//! The sender resolves the recipient's address, renders the content and
//! performs one synchronous handoff to the transport. Failure classification
//! is what drives the retry path: connection problems, timeouts and
//! rate limiting are transient; a missing or rejected address is permanent
//! and takes the channel straight to its terminal state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use courier_common::error::ChannelError;
use courier_common::store::UserDirectory;
use courier_common::types::{Channel, DeliveryPolicy, Notification};

use crate::render::{render_email_body, render_subject};
use crate::sender::{ChannelSender, SendOutcome};

/// Outbound mail handoff. One attempt, no internal retry.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, address: &str, subject: &str, body: &str)
    -> Result<(), ChannelError>;
}

/// Mail transport backed by the Resend HTTP API.
pub struct ResendMailTransport {
    client: reqwest::Client,
    api_key: String,
    from: String,
    endpoint: String,
}

impl ResendMailTransport {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
            endpoint: "https://api.resend.com/emails".to_string(),
        }
    }

    /// Override the API endpoint (used against a local stub server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl MailTransport for ResendMailTransport {
    async fn deliver(
        &self,
        address: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [address],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Transient(format!("mail transport unreachable: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // 429 and 5xx are worth retrying; any other rejection is final
        // (bad address, rejected payload).
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(ChannelError::Transient(format!(
                "mail transport returned {}",
                status
            )))
        } else {
            Err(ChannelError::Permanent(format!(
                "mail transport rejected message: {}",
                status
            )))
        }
    }
}

/// The email channel sender.
pub struct EmailSender {
    directory: Arc<dyn UserDirectory>,
    transport: Arc<dyn MailTransport>,
}

impl EmailSender {
    pub fn new(directory: Arc<dyn UserDirectory>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            directory,
            transport,
        }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn policy(&self) -> DeliveryPolicy {
        DeliveryPolicy::Durable
    }

    async fn send(&self, notification: &Notification) -> Result<SendOutcome, ChannelError> {
        let address = self
            .directory
            .email_of(notification.user_id)
            .await
            .map_err(|e| ChannelError::Transient(format!("address lookup failed: {}", e)))?
            .ok_or_else(|| {
                ChannelError::Permanent(format!(
                    "no email address on file for user {}",
                    notification.user_id
                ))
            })?;

        let subject = render_subject(notification);
        let body = render_email_body(notification);

        self.transport.deliver(&address, &subject, &body).await?;

        tracing::debug!(
            notification_id = %notification.id,
            "Email handed off to transport"
        );
        Ok(SendOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_common::store::MemoryUserDirectory;
    use courier_common::types::{NotificationKind, NotificationStatus, Priority};
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct RecordingTransport {
        deliveries: Mutex<Vec<(String, String, String)>>,
        fail_with: Option<ChannelError>,
    }

    impl RecordingTransport {
        fn ok() -> Self {
            Self {
                deliveries: Mutex::new(Vec::new()),
                fail_with: None,
            }
        }

        fn failing(error: ChannelError) -> Self {
            Self {
                deliveries: Mutex::new(Vec::new()),
                fail_with: Some(error),
            }
        }
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(
            &self,
            address: &str,
            subject: &str,
            body: &str,
        ) -> Result<(), ChannelError> {
            if let Some(error) = &self.fail_with {
                return Err(error.clone());
            }
            self.deliveries.lock().push((
                address.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    fn make_notification(user_id: Uuid) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id,
            kind: NotificationKind::TaskAssigned,
            title: "Review PR #42".to_string(),
            body: "Assigned for review".to_string(),
            priority: Priority::Medium,
            channels: vec![Channel::Email],
            status: NotificationStatus::Pending,
            read: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_send_delivers_rendered_content() {
        let user = Uuid::new_v4();
        let directory = Arc::new(MemoryUserDirectory::new());
        directory.insert(user, "dev@example.com");
        let transport = Arc::new(RecordingTransport::ok());
        let sender = EmailSender::new(directory, transport.clone());

        let outcome = sender.send(&make_notification(user)).await.unwrap();
        assert_eq!(outcome, SendOutcome::Delivered);

        let deliveries = transport.deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        let (address, subject, body) = &deliveries[0];
        assert_eq!(address, "dev@example.com");
        assert_eq!(subject, "[Task] Review PR #42");
        assert!(body.contains("Assigned for review"));
    }

    #[tokio::test]
    async fn test_missing_address_is_permanent() {
        let directory = Arc::new(MemoryUserDirectory::new());
        let transport = Arc::new(RecordingTransport::ok());
        let sender = EmailSender::new(directory, transport);

        let err = sender
            .send(&make_notification(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_transport_failure_classification_passes_through() {
        let user = Uuid::new_v4();
        let directory = Arc::new(MemoryUserDirectory::new());
        directory.insert(user, "dev@example.com");

        let sender = EmailSender::new(
            directory.clone(),
            Arc::new(RecordingTransport::failing(ChannelError::Transient(
                "connection reset".into(),
            ))),
        );
        assert!(
            sender
                .send(&make_notification(user))
                .await
                .unwrap_err()
                .is_transient()
        );

        let sender = EmailSender::new(
            directory,
            Arc::new(RecordingTransport::failing(ChannelError::Permanent(
                "mailbox does not exist".into(),
            ))),
        );
        assert!(
            !sender
                .send(&make_notification(user))
                .await
                .unwrap_err()
                .is_transient()
        );
    }

    #[test]
    fn test_email_policy_is_durable() {
        let sender = EmailSender::new(
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(RecordingTransport::ok()),
        );
        assert_eq!(sender.channel(), Channel::Email);
        assert_eq!(sender.policy(), DeliveryPolicy::Durable);
    }
}
