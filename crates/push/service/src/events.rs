//! Host server event feed.

use std::sync::Arc;

use push_core::{ConnectionId, InboundMessage, Owner};
use push_gateway::NotificationRouter;
use push_storage::RegistrationStore;
use tokio::sync::mpsc;

use crate::{DispatchEngine, DispatchOutcome, RegistrationService};

/// Event reported by the host chat server.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A message reached a live but detached session of `owner`.
    MessageDelivered {
        owner: Owner,
        message: InboundMessage,
    },
    /// A message for `owner` was put into offline storage.
    MessageStored {
        owner: Owner,
        message: InboundMessage,
    },
    ConnectionCreated {
        owner: Owner,
        connection: ConnectionId,
    },
    ConnectionDestroyed {
        connection: ConnectionId,
    },
    /// Any inbound traffic on a connection.
    InboundTraffic {
        connection: ConnectionId,
    },
    ConnectionDetached {
        connection: ConnectionId,
    },
    AccountDeleted {
        owner: Owner,
    },
}

impl HostEvent {
    fn is_message(&self) -> bool {
        matches!(self, Self::MessageDelivered { .. } | Self::MessageStored { .. })
    }
}

/// Applies host events to the dispatcher, connection registry and store.
pub struct EventBridge<S, R> {
    engine: Arc<DispatchEngine<S, R>>,
    registrations: Arc<RegistrationService<S>>,
}

impl<S, R> EventBridge<S, R>
where
    S: RegistrationStore + 'static,
    R: NotificationRouter + 'static,
{
    pub fn new(
        engine: Arc<DispatchEngine<S, R>>,
        registrations: Arc<RegistrationService<S>>,
    ) -> Self {
        Self {
            engine,
            registrations,
        }
    }

    /// Apply one event. Message events return the dispatch outcome.
    pub async fn handle(&self, event: HostEvent) -> Option<DispatchOutcome> {
        let connections = self.engine.connections();

        match event {
            HostEvent::MessageDelivered { owner, message }
            | HostEvent::MessageStored { owner, message } => {
                return Some(self.engine.dispatch(&owner, &message).await);
            }
            HostEvent::ConnectionCreated { owner, connection } => {
                connections.connect(&owner, connection, self.registrations.wants_gate(&owner));
            }
            HostEvent::ConnectionDestroyed { connection } => connections.disconnect(connection),
            HostEvent::InboundTraffic { connection } => connections.register_activity(connection),
            HostEvent::ConnectionDetached { connection } => connections.detach(connection),
            HostEvent::AccountDeleted { owner } => {
                if let Err(e) = self.registrations.delete_account(&owner) {
                    tracing::warn!(owner = %owner, error = %e, "failed to remove registrations of deleted account");
                }
            }
        }

        None
    }

    /// Consume events until every sender is dropped.
    ///
    /// Message events are dispatched on their own task so a slow gateway
    /// never holds up connection bookkeeping.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            if event.is_message() {
                let bridge = Arc::clone(&self);
                tokio::spawn(async move {
                    bridge.handle(event).await;
                });
            } else {
                self.handle(event).await;
            }
        }

        tracing::info!("host event feed closed");
    }
}
