//! Node-local rate-limit and dedup state for push attempts.
//!
//! The cache is policy-free: it records attempts and answers queries, while
//! the dispatcher decides which windows and thresholds apply. All reads and
//! writes for an owner go through [`ThrottleCache::lock`], which serializes
//! them per owner without blocking unrelated owners.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use push_core::{Fingerprint, Owner, to_delta};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Attempts recorded for one owner, oldest first.
#[derive(Debug, Default)]
pub struct ThrottleRecord {
    attempts: VecDeque<(DateTime<Utc>, Fingerprint)>,
}

impl ThrottleRecord {
    fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    fn remove_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.attempts.len();
        self.attempts.retain(|(at, _)| *at >= cutoff);
        before - self.attempts.len()
    }
}

/// Per-owner attempt history, keyed by owner identity.
#[derive(Debug, Default)]
pub struct ThrottleCache {
    records: DashMap<Owner, Arc<Mutex<ThrottleRecord>>>,
}

/// Exclusive access to one owner's attempt history.
pub struct OwnerThrottle {
    owner: Owner,
    record: OwnedMutexGuard<ThrottleRecord>,
}

impl ThrottleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the throttle lock for `owner`, creating its record lazily.
    pub async fn lock(&self, owner: &Owner) -> OwnerThrottle {
        // The map guard must be released before awaiting the owner lock.
        let record = Arc::clone(self.records.entry(owner.clone()).or_default().value());

        OwnerThrottle {
            owner: owner.clone(),
            record: record.lock_owned().await,
        }
    }

    /// Remove every attempt recorded before `cutoff`, dropping owners left empty.
    ///
    /// Takes each owner's lock in turn, so it never interleaves with a
    /// concurrent check-and-record. Returns the number of attempts removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let owners: Vec<Owner> = self.records.iter().map(|e| e.key().clone()).collect();

        let mut removed = 0;
        for owner in owners {
            let Some(record) = self.records.get(&owner).map(|e| Arc::clone(e.value())) else {
                continue;
            };

            removed += record.lock().await.remove_before(cutoff);
            drop(record);

            // A record still referenced elsewhere is in use by a dispatcher.
            self.records.remove_if(&owner, |_, record| {
                Arc::strong_count(record) == 1 && record.try_lock().is_ok_and(|r| r.is_empty())
            });
        }

        tracing::debug!(%cutoff, removed, owners = self.records.len(), "purged throttle entries");

        removed
    }

    /// Number of owners with throttle state.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl OwnerThrottle {
    /// Owner whose lock is held.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Whether an attempt with `fingerprint` was recorded within `window` of `now`.
    pub fn was_recently_notified(
        &self,
        fingerprint: &Fingerprint,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let since = now - to_delta(window);
        self.record
            .attempts
            .iter()
            .any(|(at, recorded)| recorded == fingerprint && *at > since)
    }

    /// Number of attempts, of any fingerprint, recorded within `window` of `now`.
    pub fn attempt_count(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let since = now - to_delta(window);
        self.record
            .attempts
            .iter()
            .filter(|(at, _)| *at > since)
            .count()
    }

    /// Record an attempt.
    pub fn record_attempt(&mut self, fingerprint: Fingerprint, now: DateTime<Utc>) {
        self.record.attempts.push_back((now, fingerprint));
    }
}
