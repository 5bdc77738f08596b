//! Delivery errors.

use std::time::Duration;

/// Failure delivering a notification to one destination.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The gateway answered and refused the notification.
    #[error("rejected by gateway: {0}")]
    Rejected(String),

    /// The gateway could not be reached.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The routing queue has shut down.
    #[error("routing queue closed")]
    Closed,
}
