//! Outbound notification payloads and delivery results.

use std::collections::BTreeMap;

use crate::{InboundMessage, ServiceAddress, SummaryConfig};

/// Body sent when the real body is withheld or blank.
///
/// Some gateways drop notifications without content, so the client is never woken.
pub const PLACEHOLDER_BODY: &str = "New Message";

/// Gateway-specific publish options supplied at registration time.
///
/// Opaque to the relay: stored and forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PublishOptions {
    /// Form fields, each with one or more values.
    pub fields: BTreeMap<String, Vec<String>>,
}

impl PublishOptions {
    /// Add a single-valued field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.entry(name.into()).or_default().push(value.into());
        self
    }
}

/// Summary of pending messages carried in a notification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    /// Number of messages summarized. Always 1: each message is pushed on its own.
    pub message_count: u32,

    /// Sender of the last message, when disclosure is enabled.
    pub last_message_sender: Option<String>,

    /// Body of the last message, or [`PLACEHOLDER_BODY`].
    pub last_message_body: String,
}

impl Summary {
    /// Build the summary for `message` according to `config`.
    pub fn for_message(message: &InboundMessage, config: &SummaryConfig) -> Self {
        let last_message_sender = config
            .include_last_sender
            .then(|| message.from.clone());

        let last_message_body = message
            .body
            .as_deref()
            .map(str::trim)
            .filter(|body| config.include_last_message_body && !body.is_empty())
            .unwrap_or(PLACEHOLDER_BODY)
            .to_string();

        Self {
            message_count: 1,
            last_message_sender,
            last_message_body,
        }
    }
}

/// Gateway-agnostic notification envelope for one registration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    /// Gateway the notification is routed to.
    pub service: ServiceAddress,

    /// Channel on the gateway.
    pub node: String,

    /// Optional message summary.
    pub summary: Option<Summary>,

    /// Publish options from the registration, attached verbatim.
    pub publish_options: Option<PublishOptions>,
}

impl Notification {
    /// Build the envelope for one `(service, node)` registration.
    pub fn build(
        service: ServiceAddress,
        node: String,
        message: &InboundMessage,
        config: &SummaryConfig,
        publish_options: Option<PublishOptions>,
    ) -> Self {
        let summary = config
            .enabled
            .then(|| Summary::for_message(message, config));

        Self {
            service,
            node,
            summary,
            publish_options,
        }
    }
}

/// Result of routing a notification to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Gateway that was targeted.
    pub service: ServiceAddress,
    /// Channel that was targeted.
    pub node: String,
    /// Error (if failed).
    pub error: Option<String>,
}

impl DeliveryReport {
    /// Create a successful delivery report.
    pub fn success(service: ServiceAddress, node: String) -> Self {
        Self {
            service,
            node,
            error: None,
        }
    }

    /// Create a failed delivery report.
    pub fn failure(service: ServiceAddress, node: String, error: impl std::fmt::Display) -> Self {
        Self {
            service,
            node,
            error: Some(error.to_string()),
        }
    }

    /// Check if delivery was successful.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
