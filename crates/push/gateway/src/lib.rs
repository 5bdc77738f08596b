//! Push Gateway Routing
//!
//! Outbound delivery of notification payloads to push services.

mod apns;
mod channel;
mod error;
mod traits;

pub use apns::*;
pub use channel::*;
pub use error::*;
pub use traits::*;

use push_core::Notification;

/// Router selected at runtime from configuration.
pub enum GatewayRouter {
    Apns(ApnsRouter),
    Channel(ChannelRouter),
}

impl NotificationRouter for GatewayRouter {
    async fn route(&self, notification: &Notification) -> Result<(), DeliveryError> {
        match self {
            Self::Apns(router) => router.route(notification).await,
            Self::Channel(router) => router.route(notification).await,
        }
    }
}
