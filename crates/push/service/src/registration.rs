//! Enable/disable requests and their effect on termination gates.

use std::sync::Arc;

use push_core::{Owner, PublishOptions, ServiceAddress};
use push_storage::{Deregistration, RegistrationStore, ServiceNodes, StorageError};

use crate::ConnectionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The request is malformed; nothing was changed.
    #[error("invalid registration request: {0}")]
    InvalidRequest(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Build the scope of a disable request from its optional parts.
///
/// A node without a service is meaningless and rejected, as is an empty
/// service address.
pub fn deregistration_scope(
    service: Option<ServiceAddress>,
    node: Option<String>,
) -> Result<Deregistration, RegistrationError> {
    if service.as_ref().is_some_and(|service| service.as_str().is_empty()) {
        return Err(RegistrationError::InvalidRequest("service is required"));
    }

    match (service, node) {
        (Some(service), Some(node)) => Ok(Deregistration::Node { service, node }),
        (Some(service), None) => Ok(Deregistration::Service(service)),
        (None, None) => Ok(Deregistration::All),
        (None, Some(_)) => Err(RegistrationError::InvalidRequest("node given without service")),
    }
}

/// Handles the registration protocol on behalf of owners.
pub struct RegistrationService<S> {
    store: S,
    connections: Arc<ConnectionRegistry>,
}

impl<S> RegistrationService<S> {
    pub fn new(store: S, connections: Arc<ConnectionRegistry>) -> Self {
        Self { store, connections }
    }
}

impl<S: RegistrationStore> RegistrationService<S> {
    /// Register `(service, node)` for `owner`, replacing any previous options.
    pub fn enable(
        &self,
        owner: &Owner,
        service: &ServiceAddress,
        node: &str,
        options: Option<&PublishOptions>,
    ) -> Result<(), RegistrationError> {
        if service.as_str().is_empty() {
            return Err(RegistrationError::InvalidRequest("service is required"));
        }
        if node.is_empty() {
            return Err(RegistrationError::InvalidRequest("node is required"));
        }

        self.store.register(owner, service, node, options)?;
        let gated = self.connections.install_gates(owner);

        tracing::info!(
            owner = %owner,
            service = %service,
            node,
            has_options = options.is_some(),
            gated,
            "push notifications enabled"
        );

        Ok(())
    }

    /// Remove registrations; gates go away once the owner has none left.
    ///
    /// Succeeds once the removal is stored. If the follow-up existence check
    /// fails, the owner is assumed to have nothing left.
    pub fn disable(&self, owner: &Owner, scope: &Deregistration) -> Result<usize, RegistrationError> {
        let removed = self.store.deregister(owner, scope)?;

        let remaining = self.store.has_any_registration(owner).unwrap_or_else(|e| {
            tracing::warn!(owner = %owner, error = %e, "failed to check remaining registrations");
            false
        });
        if !remaining {
            self.connections.remove_gates(owner);
        }

        tracing::info!(owner = %owner, ?scope, removed, "push notifications disabled");

        Ok(removed)
    }

    /// Drop every registration of a deleted account.
    pub fn delete_account(&self, owner: &Owner) -> Result<usize, RegistrationError> {
        self.disable(owner, &Deregistration::All)
    }

    pub fn registrations(&self, owner: &Owner) -> Result<ServiceNodes, RegistrationError> {
        Ok(self.store.registrations(owner)?)
    }

    /// Whether new connections of `owner` should be gated.
    ///
    /// Storage failures are logged and answered with `false`.
    pub fn wants_gate(&self, owner: &Owner) -> bool {
        self.store.has_any_registration(owner).unwrap_or_else(|e| {
            tracing::warn!(owner = %owner, error = %e, "failed to check registrations");
            false
        })
    }
}
