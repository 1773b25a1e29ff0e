//! Broadcast fan-out of change notifications.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::trace;

use crate::error::SubscriptionError;
use crate::event::Notification;

/// Default number of notifications buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Subscription handle for receiving notifications.
pub struct NotificationSubscription {
    receiver: broadcast::Receiver<Notification>,
}

impl NotificationSubscription {
    /// Receive the next notification.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Lagged`] when notifications were dropped
    /// because this subscriber fell behind, and [`SubscriptionError::Closed`]
    /// once the bus is gone.
    pub async fn recv(&mut self) -> Result<Notification, SubscriptionError> {
        self.receiver.recv().await.map_err(|e| match e {
            RecvError::Lagged(skipped) => SubscriptionError::Lagged(skipped),
            RecvError::Closed => SubscriptionError::Closed,
        })
    }
}

/// Publishes notifications to every live subscriber.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Create a bus with the default buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus buffering `capacity` notifications per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a notification, returning how many subscribers received it.
    pub fn publish(&self, notification: Notification) -> usize {
        trace!(
            notification_type = notification.notification_type(),
            key = %notification.key(),
            "Publishing notification"
        );
        // No subscribers yet is not an error.
        self.sender.send(notification).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> NotificationSubscription {
        NotificationSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
