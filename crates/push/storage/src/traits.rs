//! Storage traits.

use std::collections::BTreeMap;

use push_core::{Owner, PublishOptions, ServiceAddress};

use crate::StorageError;

/// Registered nodes of one owner, grouped by service.
///
/// A node maps to `None` when it was registered without publish options, or
/// when its stored options could not be decoded.
pub type ServiceNodes = BTreeMap<ServiceAddress, BTreeMap<String, Option<PublishOptions>>>;

/// Which registrations of an owner to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deregistration {
    /// A single node of a service.
    Node { service: ServiceAddress, node: String },
    /// Every node of a service.
    Service(ServiceAddress),
    /// Every registration of the owner (account deletion).
    All,
}

/// Registration storage operations.
pub trait RegistrationStore: Send + Sync {
    /// Insert or replace the registration for `(owner, service, node)`.
    fn register(
        &self,
        owner: &Owner,
        service: &ServiceAddress,
        node: &str,
        options: Option<&PublishOptions>,
    ) -> Result<(), StorageError>;

    /// Remove registrations, returning how many were removed.
    fn deregister(&self, owner: &Owner, scope: &Deregistration) -> Result<usize, StorageError>;

    /// Get all registrations of an owner. Empty when there are none.
    fn registrations(&self, owner: &Owner) -> Result<ServiceNodes, StorageError>;

    /// Check whether an owner has at least one registration.
    fn has_any_registration(&self, owner: &Owner) -> Result<bool, StorageError>;
}
