//! Live client connections and their termination gates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use push_core::{ConnectionId, Owner, SharedClock};

use crate::TerminationGate;

#[derive(Debug)]
struct Connection {
    owner: Owner,
    /// Whether the client is actively attached, as opposed to detached.
    attached: bool,
    gate: Option<Arc<TerminationGate>>,
}

/// Registry of live connections, indexed by connection and by owner.
pub struct ConnectionRegistry {
    clock: SharedClock,
    connections: DashMap<ConnectionId, Connection>,
    by_owner: DashMap<Owner, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            connections: DashMap::new(),
            by_owner: DashMap::new(),
        }
    }

    /// Track a newly established connection, with a gate when `gated`.
    ///
    /// Reporting an already tracked connection again keeps its gate and any
    /// pending push.
    pub fn connect(&self, owner: &Owner, id: ConnectionId, gated: bool) {
        match self.connections.entry(id) {
            Entry::Occupied(mut entry) => {
                let connection = entry.get_mut();
                connection.attached = true;
                if gated && connection.gate.is_none() {
                    connection.gate = Some(Arc::new(TerminationGate::new(Arc::clone(&self.clock))));
                }

                tracing::trace!(owner = %connection.owner, connection = %id, "connection already tracked");
                return;
            }
            Entry::Vacant(entry) => {
                let gate = gated.then(|| Arc::new(TerminationGate::new(Arc::clone(&self.clock))));
                entry.insert(Connection {
                    owner: owner.clone(),
                    attached: true,
                    gate,
                });
            }
        }

        tracing::trace!(owner = %owner, connection = %id, gated, "tracking connection");

        self.by_owner.entry(owner.clone()).or_default().insert(id);
    }

    /// Stop tracking a connection and drop its gate.
    pub fn disconnect(&self, id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&id) else {
            return;
        };

        if let Some(mut ids) = self.by_owner.get_mut(&connection.owner) {
            ids.remove(&id);
        }
        self.by_owner.remove_if(&connection.owner, |_, ids| ids.is_empty());

        tracing::trace!(owner = %connection.owner, connection = %id, "connection destroyed");
    }

    /// Record inbound traffic: the client is attached and has answered any push.
    pub fn register_activity(&self, id: ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.attached = true;
            if let Some(gate) = &connection.gate {
                gate.register_activity();
            }
        }
    }

    /// Mark a connection as detached from its client.
    pub fn detach(&self, id: ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.attached = false;
        }
    }

    /// Whether any connection of `owner` is currently attached.
    pub fn is_present(&self, owner: &Owner) -> bool {
        self.connection_ids(owner).into_iter().any(|id| {
            self.connections
                .get(&id)
                .is_some_and(|connection| connection.attached)
        })
    }

    /// Tell every gate of `owner` that a push was sent.
    pub fn register_push_notification(&self, owner: &Owner) {
        for id in self.connection_ids(owner) {
            if let Some(gate) = self.gate(id) {
                gate.register_push_notification();
            }
        }
    }

    /// Give every connection of `owner` a gate, keeping existing ones.
    ///
    /// Returns how many gates were created.
    pub fn install_gates(&self, owner: &Owner) -> usize {
        let mut installed = 0;
        for id in self.connection_ids(owner) {
            if let Some(mut connection) = self.connections.get_mut(&id) {
                if connection.gate.is_none() {
                    connection.gate = Some(Arc::new(TerminationGate::new(Arc::clone(&self.clock))));
                    installed += 1;
                }
            }
        }

        tracing::trace!(owner = %owner, installed, "installed termination gates");

        installed
    }

    /// Remove the gates of every connection of `owner`.
    pub fn remove_gates(&self, owner: &Owner) {
        for id in self.connection_ids(owner) {
            if let Some(mut connection) = self.connections.get_mut(&id) {
                connection.gate = None;
            }
        }

        tracing::trace!(owner = %owner, "removed termination gates");
    }

    /// Whether a detached, idle connection may be reclaimed.
    ///
    /// Connections without a gate, and unknown connections, raise no objection.
    pub fn should_terminate(&self, id: ConnectionId, allowable_inactivity: Duration) -> bool {
        self.gate(id)
            .is_none_or(|gate| gate.should_terminate(allowable_inactivity))
    }

    /// Gate of a connection, if it has one.
    pub fn gate(&self, id: ConnectionId) -> Option<Arc<TerminationGate>> {
        self.connections
            .get(&id)
            .and_then(|connection| connection.gate.clone())
    }

    /// Live connections of `owner`.
    pub fn connection_ids(&self, owner: &Owner) -> Vec<ConnectionId> {
        self.by_owner
            .get(owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GateState;
    use chrono::DateTime;
    use push_core::{Clock as _, ManualClock};

    const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);

    fn registry() -> (ConnectionRegistry, ManualClock) {
        let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        (ConnectionRegistry::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_connect_and_disconnect() {
        let (registry, _clock) = registry();
        let owner = Owner::new("juliet");
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        registry.connect(&owner, a, true);
        registry.connect(&owner, b, false);
        assert_eq!(registry.len(), 2);
        assert!(registry.gate(a).is_some());
        assert!(registry.gate(b).is_none());

        registry.disconnect(a);
        assert_eq!(registry.connection_ids(&owner), vec![b]);
        registry.disconnect(b);
        assert!(registry.is_empty());
        assert!(registry.connection_ids(&owner).is_empty());
    }

    #[test]
    fn test_push_notification_reaches_all_gates_of_owner() {
        let (registry, clock) = registry();
        let juliet = Owner::new("juliet");
        let romeo = Owner::new("romeo");
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();
        registry.connect(&juliet, a, true);
        registry.connect(&juliet, b, true);
        registry.connect(&romeo, c, true);

        registry.register_push_notification(&juliet);
        clock.advance(FIVE_MINUTES + Duration::from_secs(1));

        assert!(registry.should_terminate(a, FIVE_MINUTES));
        assert!(registry.should_terminate(b, FIVE_MINUTES));
        assert!(!registry.should_terminate(c, FIVE_MINUTES));

        registry.register_activity(a);
        assert!(!registry.should_terminate(a, FIVE_MINUTES));
    }

    #[test]
    fn test_reconnect_keeps_pending_gate() {
        let (registry, clock) = registry();
        let owner = Owner::new("juliet");
        let id = ConnectionId::new();
        registry.connect(&owner, id, true);
        registry.register_push_notification(&owner);
        let since = clock.now();

        clock.advance(Duration::from_secs(60));
        registry.connect(&owner, id, true);

        assert_eq!(registry.gate(id).unwrap().state(), GateState::Pending { since });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connection_ids(&owner), vec![id]);
    }

    #[test]
    fn test_ungated_and_unknown_connections_do_not_object() {
        let (registry, _clock) = registry();
        let owner = Owner::new("juliet");
        let id = ConnectionId::new();
        registry.connect(&owner, id, false);

        assert!(registry.should_terminate(id, FIVE_MINUTES));
        assert!(registry.should_terminate(ConnectionId::new(), FIVE_MINUTES));
    }

    #[test]
    fn test_install_gates_is_idempotent() {
        let (registry, _clock) = registry();
        let owner = Owner::new("juliet");
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.connect(&owner, a, true);
        registry.connect(&owner, b, false);

        registry.register_push_notification(&owner);
        assert_eq!(registry.install_gates(&owner), 1);
        assert_eq!(registry.install_gates(&owner), 0);

        assert!(matches!(
            registry.gate(a).unwrap().state(),
            GateState::Pending { .. }
        ));
        assert_eq!(registry.gate(b).unwrap().state(), GateState::Clear);

        registry.remove_gates(&owner);
        assert!(registry.gate(a).is_none());
        assert!(registry.gate(b).is_none());
    }

    #[test]
    fn test_presence_follows_attachment() {
        let (registry, _clock) = registry();
        let owner = Owner::new("juliet");
        let id = ConnectionId::new();
        assert!(!registry.is_present(&owner));

        registry.connect(&owner, id, true);
        assert!(registry.is_present(&owner));

        registry.detach(id);
        assert!(!registry.is_present(&owner));

        registry.register_activity(id);
        assert!(registry.is_present(&owner));
    }
}
