//! Preference resolution: which channels a user wants for a notification kind.
//!
//! Always a fresh read against the preference store, so a preference change
//! from the API takes effect on the very next notification of that kind.

use std::sync::Arc;

use uuid::Uuid;

use courier_common::store::PreferenceStore;
use courier_common::types::{Channel, NotificationKind};

pub struct PreferenceResolver {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceResolver {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Channels enabled for (user, kind). No recorded preference means all
    /// channels. A store failure degrades to the same default rather than
    /// dropping the notification.
    pub async fn enabled_channels(&self, user_id: Uuid, kind: NotificationKind) -> Vec<Channel> {
        match self.store.get(user_id, kind).await {
            Ok(Some(channels)) => channels,
            Ok(None) => Channel::ALL.to_vec(),
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    kind = %kind,
                    error = %e,
                    "Preference lookup failed, defaulting to all channels"
                );
                Channel::ALL.to_vec()
            }
        }
    }
}
