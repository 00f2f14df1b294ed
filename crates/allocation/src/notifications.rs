//! Outbound notifications.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification to {destination} failed: {reason}")]
    Delivery { destination: String, reason: String },
}

/// Sends human-readable alerts, e.g. by email.
#[async_trait]
pub trait Notifications: Send + Sync {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationsState {
    sent: Vec<(String, String)>,
    fail_on_send: bool,
}

/// In-memory notifications for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifications {
    state: Arc<RwLock<InMemoryNotificationsState>>,
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every send until reset.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_send = fail;
    }

    /// Messages sent to `destination`, oldest first.
    pub fn sent_to(&self, destination: &str) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .iter()
            .filter(|(to, _)| to == destination)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .len()
    }
}

#[async_trait]
impl Notifications for InMemoryNotifications {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotificationError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_send {
            return Err(NotificationError::Delivery {
                destination: destination.to_string(),
                reason: "mail server unavailable".to_string(),
            });
        }

        state
            .sent
            .push((destination.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sent_messages() {
        let notifications = InMemoryNotifications::new();
        notifications.send("stock@made.com", "Out of stock for LAMP").await.unwrap();
        notifications.send("ops@made.com", "hello").await.unwrap();

        assert_eq!(notifications.sent_count(), 2);
        assert_eq!(notifications.sent_to("stock@made.com"), vec!["Out of stock for LAMP"]);
    }

    #[tokio::test]
    async fn fail_on_send() {
        let notifications = InMemoryNotifications::new();
        notifications.set_fail_on_send(true);

        let result = notifications.send("stock@made.com", "x").await;
        assert!(matches!(result, Err(NotificationError::Delivery { .. })));
        assert_eq!(notifications.sent_count(), 0);
    }
}
