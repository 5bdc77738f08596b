//! Termination gate for detached connections.
//!
//! Some clients cannot keep a connection open while backgrounded and
//! reconnect promptly once a push wakes them. A detached connection of such a
//! client should only be reclaimed after a push went unanswered for long
//! enough, not on the first sign of inactivity.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use push_core::{SharedClock, to_delta};

/// Observable state of a [`TerminationGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No push is awaiting an answer.
    Clear,
    /// A push was sent at `since` and the client has not been heard from.
    Pending { since: DateTime<Utc> },
}

/// Per-connection state machine deciding whether an idle connection may be closed.
pub struct TerminationGate {
    clock: SharedClock,
    oldest_unanswered_push: Mutex<Option<DateTime<Utc>>>,
}

impl TerminationGate {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            oldest_unanswered_push: Mutex::new(None),
        }
    }

    /// Note that a push was sent; keeps the original timestamp if one is pending.
    pub fn register_push_notification(&self) {
        let mut oldest = self.state_lock();
        if oldest.is_none() {
            *oldest = Some(self.clock.now());
        }
    }

    /// Note inbound traffic from the client, answering any pending push.
    pub fn register_activity(&self) {
        *self.state_lock() = None;
    }

    /// Whether the connection may be terminated.
    ///
    /// Only true once a push has gone unanswered for longer than `allowable_inactivity`.
    pub fn should_terminate(&self, allowable_inactivity: Duration) -> bool {
        let oldest = self.state_lock();
        let result = (*oldest)
            .is_some_and(|since| self.clock.now() - since > to_delta(allowable_inactivity));

        tracing::trace!(
            should_terminate = result,
            oldest_unanswered_push = ?*oldest,
            ?allowable_inactivity,
            "evaluated termination gate"
        );

        result
    }

    pub fn state(&self) -> GateState {
        match *self.state_lock() {
            Some(since) => GateState::Pending { since },
            None => GateState::Clear,
        }
    }

    fn state_lock(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        self.oldest_unanswered_push
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TerminationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationGate")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use push_core::{Clock as _, ManualClock};

    const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);

    fn gate() -> (TerminationGate, ManualClock) {
        let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        (TerminationGate::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_clear_gate_never_terminates() {
        let (gate, clock) = gate();
        clock.advance(Duration::from_secs(3600));
        assert_eq!(gate.state(), GateState::Clear);
        assert!(!gate.should_terminate(FIVE_MINUTES));
    }

    #[test]
    fn test_push_then_immediate_check() {
        let (gate, _clock) = gate();
        gate.register_push_notification();
        assert!(!gate.should_terminate(FIVE_MINUTES));
    }

    #[test]
    fn test_unanswered_push_allows_termination() {
        let (gate, clock) = gate();
        gate.register_push_notification();
        clock.advance(FIVE_MINUTES + Duration::from_secs(1));
        assert!(gate.should_terminate(FIVE_MINUTES));
    }

    #[test]
    fn test_exactly_at_limit_does_not_terminate() {
        let (gate, clock) = gate();
        gate.register_push_notification();
        clock.advance(FIVE_MINUTES);
        assert!(!gate.should_terminate(FIVE_MINUTES));
    }

    #[test]
    fn test_activity_resets_gate() {
        let (gate, clock) = gate();
        gate.register_push_notification();
        clock.advance(Duration::from_secs(3600));
        gate.register_activity();
        assert_eq!(gate.state(), GateState::Clear);
        assert!(!gate.should_terminate(FIVE_MINUTES));
    }

    #[test]
    fn test_repeated_push_keeps_oldest_timestamp() {
        let (gate, clock) = gate();
        let first = clock.now();
        gate.register_push_notification();
        clock.advance(Duration::from_secs(200));
        gate.register_push_notification();
        assert_eq!(gate.state(), GateState::Pending { since: first });

        clock.advance(Duration::from_secs(101));
        assert!(gate.should_terminate(FIVE_MINUTES));
    }

    #[test]
    fn test_activity_without_push_is_noop() {
        let (gate, _clock) = gate();
        gate.register_activity();
        assert_eq!(gate.state(), GateState::Clear);
    }
}
