//! Queue-backed router handing notifications to the host's routing table.

use push_core::Notification;
use tokio::sync::mpsc;

use crate::{DeliveryError, NotificationRouter};

/// Router that enqueues notifications for the host server to deliver.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    tx: mpsc::Sender<Notification>,
}

impl ChannelRouter {
    /// Create a router and the receiving end the host drains.
    ///
    /// A full queue applies backpressure; the dispatcher's delivery timeout bounds the wait.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl NotificationRouter for ChannelRouter {
    async fn route(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.tx
            .send(notification.clone())
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}
