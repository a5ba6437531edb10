//! Transport-facing delivery of notifications.

use async_trait::async_trait;
use paych_sdk::objects::Notification;
use tokio::sync::mpsc;

/// The receiving side of a subscription went away.
#[derive(Debug, thiserror::Error)]
#[error("notification sink closed: {0}")]
pub struct DeliveryError(pub String);

/// Where a forwarding task delivers translated notifications.
///
/// A failed delivery ends the subscription; it is never retried.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn deliver(&self, notification: Notification) -> Result<(), DeliveryError>;
}

#[async_trait]
impl NotificationSink for mpsc::Sender<Notification> {
    async fn deliver(&self, notification: Notification) -> Result<(), DeliveryError> {
        self.send(notification)
            .await
            .map_err(|_| DeliveryError("receiver dropped".to_owned()))
    }
}
