//! APNs gateway adapter using the a2 crate.
//!
//! The registration node is the device token; the summary becomes the alert.
//! Only registrations naming this gateway's service address are accepted.

use a2::NotificationBuilder as _;
use color_eyre::eyre::WrapErr as _;
use push_core::{Notification, PLACEHOLDER_BODY, ServiceAddress};

use crate::{DeliveryError, NotificationRouter};

/// Custom payload key carrying the registration's publish options.
pub const PUBLISH_OPTIONS_KEY: &str = "publish_options";

/// APNs router using certificate authentication.
pub struct ApnsRouter {
    client: a2::Client,
    service: ServiceAddress,
    topic: String,
}

impl ApnsRouter {
    /// Create a new APNs router from PKCS12 certificate bytes and password.
    pub fn new(
        service: ServiceAddress,
        pkcs12_der: &[u8],
        password: &str,
        topic: &str,
    ) -> color_eyre::eyre::Result<Self> {
        Self::with_endpoint(service, pkcs12_der, password, topic, a2::Endpoint::Production)
    }

    /// Create a new APNs router for the sandbox environment.
    pub fn sandbox(
        service: ServiceAddress,
        pkcs12_der: &[u8],
        password: &str,
        topic: &str,
    ) -> color_eyre::eyre::Result<Self> {
        Self::with_endpoint(service, pkcs12_der, password, topic, a2::Endpoint::Sandbox)
    }

    fn with_endpoint(
        service: ServiceAddress,
        pkcs12_der: &[u8],
        password: &str,
        topic: &str,
        endpoint: a2::Endpoint,
    ) -> color_eyre::eyre::Result<Self> {
        let mut cursor = std::io::Cursor::new(pkcs12_der);
        let config = a2::ClientConfig::new(endpoint);

        let client = a2::Client::certificate(&mut cursor, password, config)
            .wrap_err("failed to create APNs client")?;

        Ok(Self {
            client,
            service,
            topic: topic.to_string(),
        })
    }
}

/// Alert title and body for a notification.
pub fn alert_text(notification: &Notification) -> (Option<&str>, &str) {
    match &notification.summary {
        Some(summary) => (
            summary.last_message_sender.as_deref(),
            summary.last_message_body.as_str(),
        ),
        None => (None, PLACEHOLDER_BODY),
    }
}

/// Reject notifications addressed to a different gateway.
pub fn ensure_service(
    service: &ServiceAddress,
    notification: &Notification,
) -> Result<(), DeliveryError> {
    if &notification.service == service {
        return Ok(());
    }

    Err(DeliveryError::Rejected(format!(
        "{} is not served by the APNs gateway {service}",
        notification.service
    )))
}

/// Build the APNs payload, with publish options as custom data.
pub fn payload<'a>(
    notification: &'a Notification,
    topic: &'a str,
) -> Result<a2::request::payload::Payload<'a>, DeliveryError> {
    let (title, body) = alert_text(notification);

    let mut builder = a2::DefaultNotificationBuilder::new()
        .set_body(body)
        .set_mutable_content();
    if let Some(title) = title {
        builder = builder.set_title(title);
    }

    let mut payload = builder.build(
        &notification.node,
        a2::NotificationOptions {
            apns_topic: Some(topic),
            ..Default::default()
        },
    );

    if let Some(options) = &notification.publish_options {
        payload
            .add_custom_data(PUBLISH_OPTIONS_KEY, options)
            .map_err(|e| DeliveryError::Rejected(format!("invalid publish options: {e}")))?;
    }

    Ok(payload)
}

impl NotificationRouter for ApnsRouter {
    async fn route(&self, notification: &Notification) -> Result<(), DeliveryError> {
        ensure_service(&self.service, notification)?;
        let payload = payload(notification, &self.topic)?;

        match self.client.send(payload).await {
            Ok(response) => {
                tracing::trace!(
                    node = %notification.node,
                    apns_id = ?response.apns_id,
                    "APNs accepted notification"
                );
                Ok(())
            }
            Err(a2::Error::ResponseError(response)) => Err(DeliveryError::Rejected(format!(
                "APNs status {}",
                response.code
            ))),
            Err(e) => Err(DeliveryError::Unavailable(e.to_string())),
        }
    }
}
