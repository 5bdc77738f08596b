//! Push dispatch: decide, throttle, and fan out one message to every registration.

use std::sync::Arc;
use std::time::Duration;

use push_core::{
    DEDUP_WINDOW, DeliveryReport, InboundMessage, Notification, Owner, RATE_WINDOW, RelayConfig,
    SharedClock, SummaryConfig,
};
use push_gateway::{DeliveryError, NotificationRouter};
use push_storage::RegistrationStore;

use crate::{ConnectionRegistry, ThrottleCache};

/// Tunable dispatch policy.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Attempts allowed per owner within [`RATE_WINDOW`].
    pub max_pushes_per_second: usize,
    pub summary: SummaryConfig,
    /// Skip dispatch while the owner has an attached connection.
    pub skip_when_present: bool,
    /// Upper bound on routing one notification.
    pub delivery_timeout: Duration,
}

impl DispatchPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            max_pushes_per_second: config.throttle.max_pushes_per_second,
            summary: config.summary.clone(),
            skip_when_present: config.dispatch.skip_when_present,
            delivery_timeout: config.dispatch.delivery_timeout(),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Why a dispatch was suppressed by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// The same message was pushed within the dedup window.
    Duplicate,
    /// The owner reached the attempt rate limit.
    RateLimited,
}

/// What a dispatch decided and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The message has no content worth a push.
    NotNotifiable,
    /// The owner has an attached connection and presence skipping is enabled.
    OwnerPresent,
    /// The owner has no registrations, or they could not be read.
    NoRegistrations,
    Suppressed(Suppression),
    /// One report per registration, successful or not.
    Dispatched(Vec<DeliveryReport>),
}

impl DispatchOutcome {
    /// Number of successful deliveries.
    pub fn delivered(&self) -> usize {
        match self {
            Self::Dispatched(reports) => reports.iter().filter(|r| r.is_success()).count(),
            _ => 0,
        }
    }
}

/// Turns inbound messages into push notifications.
pub struct DispatchEngine<S, R> {
    store: S,
    router: R,
    throttle: Arc<ThrottleCache>,
    connections: Arc<ConnectionRegistry>,
    clock: SharedClock,
    policy: DispatchPolicy,
}

impl<S, R> DispatchEngine<S, R> {
    /// Create an engine with the default policy and a fresh throttle cache.
    pub fn new(
        store: S,
        router: R,
        connections: Arc<ConnectionRegistry>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            router,
            throttle: Arc::new(ThrottleCache::new()),
            connections,
            clock,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share an existing throttle cache, e.g. with the purge task.
    pub fn with_throttle(mut self, throttle: Arc<ThrottleCache>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn throttle(&self) -> &Arc<ThrottleCache> {
        &self.throttle
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }
}

impl<S, R> DispatchEngine<S, R>
where
    S: RegistrationStore,
    R: NotificationRouter,
{
    /// Push `message` to every registration of `owner`, subject to policy.
    ///
    /// Never fails: storage and delivery errors are logged and reflected in
    /// the outcome, so ordinary message delivery is never affected.
    pub async fn dispatch(&self, owner: &Owner, message: &InboundMessage) -> DispatchOutcome {
        if !message.is_notifiable() {
            tracing::trace!(owner = %owner, from = %message.from, "message not notifiable");
            return DispatchOutcome::NotNotifiable;
        }

        if self.policy.skip_when_present && self.connections.is_present(owner) {
            tracing::debug!(owner = %owner, "owner present, skipping push");
            return DispatchOutcome::OwnerPresent;
        }

        let registrations = match self.store.registrations(owner) {
            Ok(registrations) => registrations,
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "failed to load registrations, skipping push");
                return DispatchOutcome::NoRegistrations;
            }
        };
        if registrations.is_empty() {
            tracing::trace!(owner = %owner, "no registrations");
            return DispatchOutcome::NoRegistrations;
        }

        let fingerprint = message.fingerprint(owner);

        {
            let mut throttle = self.throttle.lock(owner).await;
            let now = self.clock.now();

            if throttle.was_recently_notified(&fingerprint, DEDUP_WINDOW, now) {
                tracing::debug!(owner = %owner, %fingerprint, "duplicate message, push suppressed");
                return DispatchOutcome::Suppressed(Suppression::Duplicate);
            }

            let attempts = throttle.attempt_count(RATE_WINDOW, now);
            if attempts >= self.policy.max_pushes_per_second {
                tracing::debug!(
                    owner = %owner,
                    attempts,
                    limit = self.policy.max_pushes_per_second,
                    "rate limit reached, push suppressed"
                );
                return DispatchOutcome::Suppressed(Suppression::RateLimited);
            }

            // Recorded before routing so a slow gateway cannot let concurrent dispatches through.
            throttle.record_attempt(fingerprint, now);
        }

        let mut reports = Vec::new();
        for (service, nodes) in registrations {
            for (node, options) in nodes {
                let notification = Notification::build(
                    service.clone(),
                    node,
                    message,
                    &self.policy.summary,
                    options,
                );
                reports.push(self.deliver(owner, notification).await);
            }
        }

        self.connections.register_push_notification(owner);

        DispatchOutcome::Dispatched(reports)
    }

    async fn deliver(&self, owner: &Owner, notification: Notification) -> DeliveryReport {
        let timeout = self.policy.delivery_timeout;
        let result = match tokio::time::timeout(timeout, self.router.route(&notification)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                tracing::trace!(
                    owner = %owner,
                    service = %notification.service,
                    node = %notification.node,
                    "routed push notification"
                );
                DeliveryReport::success(notification.service, notification.node)
            }
            Err(e) => {
                tracing::warn!(
                    owner = %owner,
                    service = %notification.service,
                    node = %notification.node,
                    error = %e,
                    "push delivery failed"
                );
                DeliveryReport::failure(notification.service, notification.node, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use chrono::DateTime;
    use push_core::{ConnectionId, ManualClock, PublishOptions, ServiceAddress};
    use push_storage::{Deregistration, ServiceNodes, SqliteStorage, StorageError};

    /// Records every routed notification; fails for nodes listed in `failing`.
    #[derive(Default)]
    struct RecordingRouter {
        routed: Mutex<Vec<Notification>>,
        failing: Vec<String>,
    }

    impl RecordingRouter {
        fn failing(nodes: &[&str]) -> Self {
            Self {
                failing: nodes.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }

        fn routed(&self) -> Vec<Notification> {
            self.routed.lock().unwrap().clone()
        }
    }

    impl NotificationRouter for RecordingRouter {
        async fn route(&self, notification: &Notification) -> Result<(), DeliveryError> {
            if self.failing.contains(&notification.node) {
                return Err(DeliveryError::Unavailable("connection refused".into()));
            }
            self.routed.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct StalledRouter;

    impl NotificationRouter for StalledRouter {
        async fn route(&self, _notification: &Notification) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    struct BrokenStore;

    impl RegistrationStore for BrokenStore {
        fn register(
            &self,
            _owner: &Owner,
            _service: &ServiceAddress,
            _node: &str,
            _options: Option<&PublishOptions>,
        ) -> Result<(), StorageError> {
            Err(StorageError::Migration("database is locked".into()))
        }

        fn deregister(&self, _owner: &Owner, _scope: &Deregistration) -> Result<usize, StorageError> {
            Err(StorageError::Migration("database is locked".into()))
        }

        fn registrations(&self, _owner: &Owner) -> Result<ServiceNodes, StorageError> {
            Err(StorageError::Migration("database is locked".into()))
        }

        fn has_any_registration(&self, _owner: &Owner) -> Result<bool, StorageError> {
            Err(StorageError::Migration("database is locked".into()))
        }
    }

    fn juliet() -> Owner {
        Owner::new("juliet@capulet.lit")
    }

    fn push_service() -> ServiceAddress {
        ServiceAddress::new("push-5.client.example")
    }

    fn clock() -> ManualClock {
        ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    fn store_with(nodes: &[&str]) -> SqliteStorage {
        let store = SqliteStorage::in_memory().unwrap();
        for node in nodes {
            store.register(&juliet(), &push_service(), node, None).unwrap();
        }
        store
    }

    fn engine<S, R>(store: S, router: R, clock: &ManualClock) -> DispatchEngine<S, R> {
        let clock: SharedClock = Arc::new(clock.clone());
        let connections = Arc::new(ConnectionRegistry::new(Arc::clone(&clock)));
        DispatchEngine::new(store, router, connections, clock)
    }

    fn message(body: &str) -> InboundMessage {
        InboundMessage::new("romeo@montague.lit/orchard", body)
    }

    #[tokio::test]
    async fn test_dispatch_builds_summary_with_options() {
        let store = SqliteStorage::in_memory().unwrap();
        let options = PublishOptions::default().with_field("secret", "eruio234vzxc2kla-91");
        store
            .register(&juliet(), &push_service(), "n1", Some(&options))
            .unwrap();
        let router = Arc::new(RecordingRouter::default());
        let engine = engine(store, Arc::clone(&router), &clock());

        let outcome = engine.dispatch(&juliet(), &message("Wherefore art thou?")).await;

        assert_eq!(outcome.delivered(), 1);
        let routed = router.routed();
        assert_eq!(routed[0].node, "n1");
        assert_eq!(routed[0].publish_options, Some(options));
        let summary = routed[0].summary.as_ref().unwrap();
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.last_message_sender, None);
        assert_eq!(summary.last_message_body, push_core::PLACEHOLDER_BODY);
    }

    #[tokio::test]
    async fn test_duplicate_message_is_suppressed() {
        let clock = clock();
        let router = Arc::new(RecordingRouter::default());
        let engine = engine(store_with(&["n1"]), Arc::clone(&router), &clock);
        let msg = message("hi").with_id("abc-1");

        assert_eq!(engine.dispatch(&juliet(), &msg).await.delivered(), 1);
        clock.advance(Duration::from_secs(60));
        assert_eq!(
            engine.dispatch(&juliet(), &msg).await,
            DispatchOutcome::Suppressed(Suppression::Duplicate)
        );
        assert_eq!(router.routed().len(), 1);

        clock.advance(DEDUP_WINDOW);
        assert_eq!(engine.dispatch(&juliet(), &msg).await.delivered(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_allows_five_per_second() {
        let clock = clock();
        let router = Arc::new(RecordingRouter::default());
        let engine = engine(store_with(&["n1"]), Arc::clone(&router), &clock);

        let mut delivered = 0;
        for i in 0..6 {
            let outcome = engine.dispatch(&juliet(), &message(&format!("msg {i}"))).await;
            delivered += outcome.delivered();
            if i == 5 {
                assert_eq!(outcome, DispatchOutcome::Suppressed(Suppression::RateLimited));
            }
            clock.advance(Duration::from_millis(100));
        }
        assert_eq!(delivered, 5);

        // 1.1s after the first message.
        clock.advance(Duration::from_millis(500));
        assert_eq!(engine.dispatch(&juliet(), &message("msg 7")).await.delivered(), 1);
    }

    #[tokio::test]
    async fn test_failed_destination_does_not_block_others() {
        let router = Arc::new(RecordingRouter::failing(&["broken"]));
        let engine = engine(store_with(&["broken", "working"]), Arc::clone(&router), &clock());

        let outcome = engine.dispatch(&juliet(), &message("hi")).await;

        let DispatchOutcome::Dispatched(reports) = outcome else {
            panic!("expected dispatch, got {outcome:?}");
        };
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().any(|r| r.node == "broken" && !r.is_success()));
        assert!(reports.iter().any(|r| r.node == "working" && r.is_success()));
        assert_eq!(router.routed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_gateway_times_out() {
        let engine = engine(store_with(&["n1"]), StalledRouter, &clock()).with_policy(DispatchPolicy {
            delivery_timeout: Duration::from_secs(2),
            ..Default::default()
        });

        let outcome = engine.dispatch(&juliet(), &message("hi")).await;

        let DispatchOutcome::Dispatched(reports) = outcome else {
            panic!("expected dispatch, got {outcome:?}");
        };
        assert!(reports[0].error.as_deref().is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn test_storage_failure_skips_push() {
        let router = Arc::new(RecordingRouter::default());
        let engine = engine(BrokenStore, Arc::clone(&router), &clock());

        assert_eq!(
            engine.dispatch(&juliet(), &message("hi")).await,
            DispatchOutcome::NoRegistrations
        );
        assert!(router.routed().is_empty());
    }

    #[tokio::test]
    async fn test_no_registrations_is_noop() {
        let router = Arc::new(RecordingRouter::default());
        let engine = engine(store_with(&[]), Arc::clone(&router), &clock());

        assert_eq!(
            engine.dispatch(&juliet(), &message("hi")).await,
            DispatchOutcome::NoRegistrations
        );
        assert!(engine.throttle().is_empty());
    }

    #[tokio::test]
    async fn test_bodyless_message_is_not_dispatched() {
        let router = Arc::new(RecordingRouter::default());
        let engine = engine(store_with(&["n1"]), Arc::clone(&router), &clock());

        let mut typing = message("");
        assert_eq!(engine.dispatch(&juliet(), &typing).await, DispatchOutcome::NotNotifiable);
        typing.body = None;
        assert_eq!(engine.dispatch(&juliet(), &typing).await, DispatchOutcome::NotNotifiable);
        assert!(router.routed().is_empty());
    }

    #[tokio::test]
    async fn test_present_owner_is_skipped_when_configured() {
        let router = Arc::new(RecordingRouter::default());
        let engine = engine(store_with(&["n1"]), Arc::clone(&router), &clock()).with_policy(
            DispatchPolicy {
                skip_when_present: true,
                ..Default::default()
            },
        );
        let id = ConnectionId::new();
        engine.connections().connect(&juliet(), id, true);

        assert_eq!(
            engine.dispatch(&juliet(), &message("hi")).await,
            DispatchOutcome::OwnerPresent
        );

        engine.connections().detach(id);
        assert_eq!(engine.dispatch(&juliet(), &message("hi")).await.delivered(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_arms_termination_gates() {
        let clock = clock();
        let engine = engine(store_with(&["n1"]), RecordingRouter::default(), &clock);
        let id = ConnectionId::new();
        engine.connections().connect(&juliet(), id, true);
        engine.connections().detach(id);

        engine.dispatch(&juliet(), &message("hi")).await;
        clock.advance(Duration::from_secs(5 * 60 + 1));

        assert!(engine.connections().should_terminate(id, Duration::from_secs(5 * 60)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicates_deliver_once() {
        let router = Arc::new(RecordingRouter::default());
        let engine = Arc::new(engine(store_with(&["n1"]), Arc::clone(&router), &clock()));
        let msg = message("hi").with_id("same");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let msg = msg.clone();
                tokio::spawn(async move { engine.dispatch(&juliet(), &msg).await.delivered() })
            })
            .collect();

        let mut delivered = 0;
        for task in tasks {
            delivered += task.await.unwrap();
        }
        assert_eq!(delivered, 1);
        assert_eq!(router.routed().len(), 1);
    }
}
