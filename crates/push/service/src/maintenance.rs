//! Periodic purge of throttle state.

use std::sync::Arc;

use push_core::{PURGE_INTERVAL, RETENTION_HORIZON, SharedClock, to_delta};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::ThrottleCache;

/// Cluster leadership, consulted before running maintenance.
pub trait Leadership: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Single-node deployment: always the leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneLeadership;

impl Leadership for StandaloneLeadership {
    fn is_leader(&self) -> bool {
        true
    }
}

/// Run one purge if this node leads. Returns the number of entries removed.
pub async fn purge_once(
    throttle: &ThrottleCache,
    clock: &SharedClock,
    leadership: &dyn Leadership,
) -> Option<usize> {
    if !leadership.is_leader() {
        tracing::trace!("not the leader, skipping throttle purge");
        return None;
    }

    let cutoff = clock.now() - to_delta(RETENTION_HORIZON);
    Some(throttle.purge_older_than(cutoff).await)
}

/// Purge throttle state every [`PURGE_INTERVAL`] until the task is aborted.
///
/// Leadership is checked on every tick.
pub fn spawn_purge_task(
    throttle: Arc<ThrottleCache>,
    clock: SharedClock,
    leadership: Arc<dyn Leadership>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + PURGE_INTERVAL, PURGE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            purge_once(&throttle, &clock, leadership.as_ref()).await;
        }
    })
}
