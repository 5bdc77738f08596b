//! Routing traits.

use push_core::Notification;

use crate::DeliveryError;

/// Delivers a notification to the push service named in it.
///
/// The relay does not know the gateway's wire protocol; implementations do.
#[trait_variant::make(Send)]
pub trait NotificationRouter: Send + Sync {
    /// Route one notification to `notification.service`.
    async fn route(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

impl<T: NotificationRouter> NotificationRouter for std::sync::Arc<T> {
    async fn route(&self, notification: &Notification) -> Result<(), DeliveryError> {
        T::route(self, notification).await
    }
}
