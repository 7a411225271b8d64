use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use common::CorrelationId;
use messaging::{EventEnvelope, EventHandler, EventSource, SubscriptionId};
use tokio::sync::{Mutex as AsyncMutex, oneshot, watch};
use tokio::task::JoinHandle;

use crate::waiter::{Outcome, Waiter};
use crate::{AwaitError, AwaitedEvent, AwaiterConfig, Result};

/// One shared event-source subscription, held while any waiter needs the type.
struct TypeSubscription {
    id: SubscriptionId,
    holders: usize,
}

struct Inner {
    source: Arc<dyn EventSource>,
    config: AwaiterConfig,
    waiters: RwLock<HashMap<CorrelationId, Arc<Waiter>>>,
    // Held across subscribe/unsubscribe so refcount changes stay ordered.
    subscriptions: AsyncMutex<HashMap<String, TypeSubscription>>,
    next_token: AtomicU64,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// The correlation engine.
///
/// Cheap to clone; clones share the same registry. Independent engines do not
/// share anything, so tests can run one per case.
#[derive(Clone)]
pub struct EventAwaiter {
    inner: Arc<Inner>,
}

impl EventAwaiter {
    /// Creates an engine over `source` and spawns its background sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(source: Arc<dyn EventSource>, config: AwaiterConfig) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let sweep_interval = config.sweep_interval.max(Duration::from_millis(1));
        let inner = Arc::new(Inner {
            source,
            config,
            waiters: RwLock::new(HashMap::new()),
            subscriptions: AsyncMutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            shutdown,
            sweeper: Mutex::new(None),
        });

        let handle = tokio::spawn(sweep_loop(
            Arc::downgrade(&inner),
            sweep_interval,
            shutdown_rx,
        ));
        *inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(
            sweep_interval = ?sweep_interval,
            orphan_grace = ?inner.config.orphan_grace,
            "event awaiter started"
        );
        Self { inner }
    }

    pub fn config(&self) -> &AwaiterConfig {
        &self.inner.config
    }

    /// Registers a waiter without blocking.
    ///
    /// The returned [`PendingAwait`] is live immediately: an event published
    /// after this returns will be delivered to it. A zero `timeout` selects
    /// the configured default.
    pub async fn register(
        &self,
        correlation_id: CorrelationId,
        event_types: &[&str],
        timeout: Duration,
    ) -> Result<PendingAwait> {
        let inner = &self.inner;
        if inner.is_stopped() {
            return Err(AwaitError::Stopped { correlation_id });
        }

        let mut types: Vec<String> = Vec::with_capacity(event_types.len());
        for event_type in event_types {
            if !types.iter().any(|t| t == event_type) {
                types.push(event_type.to_string());
            }
        }
        if types.is_empty() {
            return Err(AwaitError::NoEventTypes);
        }

        let timeout = if timeout.is_zero() {
            inner.config.default_timeout
        } else {
            timeout
        };
        let token = inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (waiter, receiver) = Waiter::new(token, correlation_id.clone(), types, timeout);
        let waiter = Arc::new(waiter);

        {
            let mut waiters = inner.waiters.write().unwrap_or_else(PoisonError::into_inner);
            if waiters.contains_key(&correlation_id) {
                return Err(AwaitError::DuplicateWaiter(correlation_id));
            }
            waiters.insert(correlation_id.clone(), waiter.clone());
        }

        if let Err(e) = inner.acquire(&waiter.event_types).await {
            // acquire already rolled back its own subscriptions
            inner.detach(&waiter);
            return Err(e);
        }

        // stop() may have drained the registry before our insert landed.
        if inner.is_stopped() {
            waiter.resolve(Outcome::Stopped);
        }

        metrics::counter!("correlation_waiters_registered_total").increment(1);
        tracing::debug!(
            %correlation_id,
            event_types = ?waiter.event_types,
            ?timeout,
            "waiter registered"
        );

        Ok(PendingAwait {
            inner: inner.clone(),
            waiter,
            receiver,
            released: false,
        })
    }

    /// Waits for one event of `event_type` carrying `correlation_id`.
    pub async fn await_event(
        &self,
        correlation_id: CorrelationId,
        event_type: &str,
        timeout: Duration,
    ) -> Result<EventEnvelope> {
        let mut pending = self.register(correlation_id, &[event_type], timeout).await?;
        pending.wait().await.map(AwaitedEvent::into_event)
    }

    /// Waits for the first event of any of `event_types`, reporting which
    /// type matched.
    #[tracing::instrument(skip(self, correlation_id), fields(correlation_id = %correlation_id))]
    pub async fn await_any(
        &self,
        correlation_id: CorrelationId,
        event_types: &[&str],
        timeout: Duration,
    ) -> Result<AwaitedEvent> {
        let mut pending = self.register(correlation_id, event_types, timeout).await?;
        pending.wait().await
    }

    /// Runs independent awaits one after another and collects every result.
    pub async fn await_multiple(&self, specs: Vec<AwaitSpec>) -> MultiAwait {
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let outcome = self
                .await_event(spec.correlation_id.clone(), &spec.event_type, spec.timeout)
                .await;
            results.push((spec.correlation_id, outcome));
        }
        MultiAwait { results }
    }

    /// Releases an in-flight await with a cancelled outcome.
    ///
    /// Returns false if nothing was waiting on `correlation_id`.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let waiter = self
            .inner
            .waiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(correlation_id);

        match waiter {
            Some(waiter) => {
                let resolved = waiter.resolve(Outcome::Cancelled);
                tracing::debug!(%correlation_id, resolved, "waiter cancelled");
                resolved
            }
            None => false,
        }
    }

    /// Stops the engine.
    ///
    /// New registrations are rejected, every outstanding waiter is released
    /// with a stopped outcome, and the sweep task is awaited for at most
    /// `deadline`. Calling it again is a no-op.
    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let drained: Vec<Arc<Waiter>> = self
            .inner
            .waiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, waiter)| waiter)
            .collect();
        for waiter in &drained {
            waiter.resolve(Outcome::Stopped);
        }

        let _ = self.inner.shutdown.send(true);
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper
            && tokio::time::timeout(deadline, handle).await.is_err()
        {
            tracing::warn!(?deadline, "awaiter sweep task did not exit in time");
            return Err(AwaitError::ShutdownTimedOut(deadline));
        }

        tracing::info!(released = drained.len(), "event awaiter stopped");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Number of waiters currently registered.
    pub fn pending_count(&self) -> usize {
        self.inner
            .waiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of waiters holding the shared subscription for `event_type`.
    pub async fn subscription_count(&self, event_type: &str) -> usize {
        self.inner
            .subscriptions
            .lock()
            .await
            .get(event_type)
            .map(|s| s.holders)
            .unwrap_or(0)
    }

    /// Removes orphaned waiters now instead of waiting for the next sweep.
    pub async fn sweep(&self) -> usize {
        self.inner.sweep_orphans().await
    }
}

impl Inner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Matches an incoming event against the registry. Never blocks.
    fn deliver(&self, event: &EventEnvelope) -> bool {
        if event.correlation_id.is_empty() {
            return false;
        }

        let waiter = self
            .waiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.correlation_id)
            .cloned();

        let Some(waiter) = waiter else {
            return false;
        };
        if !waiter.expects(&event.event_type) {
            return false;
        }

        let delivered = waiter.resolve(Outcome::Delivered(AwaitedEvent {
            matched_type: event.event_type.clone(),
            event: event.clone(),
        }));
        if delivered {
            metrics::counter!("correlation_events_delivered_total").increment(1);
            tracing::debug!(
                correlation_id = %event.correlation_id,
                event_type = %event.event_type,
                "event delivered to waiter"
            );
        } else {
            tracing::debug!(
                correlation_id = %event.correlation_id,
                event_type = %event.event_type,
                "duplicate event dropped"
            );
        }
        delivered
    }

    async fn acquire(self: &Arc<Self>, event_types: &[String]) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        let mut acquired: Vec<&String> = Vec::with_capacity(event_types.len());

        for event_type in event_types {
            if let Some(existing) = subscriptions.get_mut(event_type) {
                existing.holders += 1;
                acquired.push(event_type);
                continue;
            }

            let dispatch = Arc::new(Dispatch {
                inner: Arc::downgrade(self),
            });
            match self.source.subscribe(event_type, dispatch).await {
                Ok(id) => {
                    subscriptions.insert(event_type.clone(), TypeSubscription { id, holders: 1 });
                    acquired.push(event_type);
                }
                Err(e) => {
                    for event_type in acquired {
                        self.release_locked(&mut subscriptions, event_type).await;
                    }
                    return Err(AwaitError::Subscription(e));
                }
            }
        }
        Ok(())
    }

    async fn release(&self, event_types: &[String]) {
        let mut subscriptions = self.subscriptions.lock().await;
        for event_type in event_types {
            self.release_locked(&mut subscriptions, event_type).await;
        }
    }

    async fn release_locked(
        &self,
        subscriptions: &mut HashMap<String, TypeSubscription>,
        event_type: &str,
    ) {
        let Some(entry) = subscriptions.get_mut(event_type) else {
            return;
        };
        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders > 0 {
            return;
        }

        let id = entry.id;
        subscriptions.remove(event_type);
        if let Err(e) = self.source.unsubscribe(event_type, id).await {
            tracing::warn!(%event_type, subscription = %id, error = %e, "unsubscribe failed");
        }
    }

    /// Removes the waiter from the registry if it is still the registered
    /// one. Returns true if the caller now owns releasing its subscriptions.
    fn detach(&self, waiter: &Waiter) -> bool {
        {
            let mut waiters = self.waiters.write().unwrap_or_else(PoisonError::into_inner);
            if waiters
                .get(&waiter.correlation_id)
                .is_some_and(|w| w.token == waiter.token)
            {
                waiters.remove(&waiter.correlation_id);
            }
        }
        waiter.claim_release()
    }

    async fn sweep_orphans(&self) -> usize {
        let now = tokio::time::Instant::now();
        let grace = self.config.orphan_grace;

        let orphans: Vec<Arc<Waiter>> = {
            let mut waiters = self.waiters.write().unwrap_or_else(PoisonError::into_inner);
            let expired: Vec<CorrelationId> = waiters
                .iter()
                .filter(|(_, w)| now.saturating_duration_since(w.registered_at) > w.timeout + grace)
                .map(|(cid, _)| cid.clone())
                .collect();
            expired
                .iter()
                .filter_map(|cid| waiters.remove(cid))
                .collect()
        };

        for waiter in &orphans {
            waiter.abandon();
            if waiter.claim_release() {
                self.release(&waiter.event_types).await;
            }
            tracing::warn!(correlation_id = %waiter.correlation_id, "orphaned waiter swept");
        }

        if !orphans.is_empty() {
            metrics::counter!("correlation_orphans_swept_total").increment(orphans.len() as u64);
        }
        orphans.len()
    }
}

/// Event-source handler shared by every waiter of one event type.
struct Dispatch {
    inner: Weak<Inner>,
}

#[async_trait]
impl EventHandler for Dispatch {
    async fn handle(&self, event: &EventEnvelope) -> messaging::Result<()> {
        if let Some(inner) = self.inner.upgrade() {
            inner.deliver(event);
        }
        Ok(())
    }
}

async fn sweep_loop(inner: Weak<Inner>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let swept = inner.sweep_orphans().await;
                if swept > 0 {
                    tracing::debug!(swept, "awaiter sweep pass");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("awaiter sweep task exited");
}

/// A registered waiter.
///
/// Call [`wait`](Self::wait) to block until it resolves. Dropping it without
/// waiting still removes the waiter and releases its subscriptions.
pub struct PendingAwait {
    inner: Arc<Inner>,
    waiter: Arc<Waiter>,
    receiver: oneshot::Receiver<Outcome>,
    released: bool,
}

impl PendingAwait {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.waiter.correlation_id
    }

    pub fn event_types(&self) -> &[String] {
        &self.waiter.event_types
    }

    pub fn timeout(&self) -> Duration {
        self.waiter.timeout
    }

    /// Blocks until delivery, timeout, cancel or stop, then releases the waiter.
    ///
    /// The timeout runs from registration, not from this call.
    pub async fn wait(&mut self) -> Result<AwaitedEvent> {
        let correlation_id = self.waiter.correlation_id.clone();
        if self.released {
            return Err(AwaitError::Cancelled { correlation_id });
        }

        let received = tokio::time::timeout_at(self.waiter.deadline(), &mut self.receiver).await;
        self.release().await;

        match received {
            Ok(Ok(Outcome::Delivered(event))) => Ok(event),
            Ok(Ok(Outcome::Cancelled)) => Err(AwaitError::Cancelled { correlation_id }),
            Ok(Ok(Outcome::Stopped)) => Err(AwaitError::Stopped { correlation_id }),
            // Sender dropped by the orphan sweep.
            Ok(Err(_)) | Err(_) => {
                metrics::counter!("correlation_timeouts_total").increment(1);
                tracing::debug!(%correlation_id, timeout = ?self.waiter.timeout, "await timed out");
                Err(AwaitError::Timeout {
                    correlation_id,
                    timeout: self.waiter.timeout,
                })
            }
        }
    }

    /// Removes the waiter and releases its subscriptions without waiting.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.inner.detach(&self.waiter) {
            self.inner.release(&self.waiter.event_types).await;
        }
    }
}

impl Drop for PendingAwait {
    fn drop(&mut self) {
        if self.released || !self.inner.detach(&self.waiter) {
            return;
        }

        let inner = self.inner.clone();
        let event_types = self.waiter.event_types.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { inner.release(&event_types).await });
            }
            Err(_) => tracing::warn!(
                correlation_id = %self.waiter.correlation_id,
                "no runtime to release waiter subscriptions"
            ),
        }
    }
}

/// One entry of an [`EventAwaiter::await_multiple`] call.
#[derive(Debug, Clone)]
pub struct AwaitSpec {
    pub correlation_id: CorrelationId,
    pub event_type: String,
    pub timeout: Duration,
}

impl AwaitSpec {
    /// Uses the engine's default timeout.
    pub fn new(correlation_id: CorrelationId, event_type: impl Into<String>) -> Self {
        Self {
            correlation_id,
            event_type: event_type.into(),
            timeout: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Aggregated results of [`EventAwaiter::await_multiple`], in request order.
#[derive(Debug)]
pub struct MultiAwait {
    results: Vec<(CorrelationId, Result<EventEnvelope>)>,
}

impl MultiAwait {
    pub fn results(&self) -> &[(CorrelationId, Result<EventEnvelope>)] {
        &self.results
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    /// Events that arrived, in request order.
    pub fn events(&self) -> Vec<&EventEnvelope> {
        self.results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .collect()
    }

    /// Collapses to every event, or to [`AwaitError::Multiple`] with every
    /// failure if any await failed.
    pub fn into_result(self) -> Result<Vec<EventEnvelope>> {
        let mut events = Vec::with_capacity(self.results.len());
        let mut errors = Vec::new();
        for (_, result) in self.results {
            match result {
                Ok(event) => events.push(event),
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(events)
        } else {
            Err(AwaitError::Multiple(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::{InMemoryEventBus, MessagingError};
    use serde_json::json;

    fn engine() -> (InMemoryEventBus, EventAwaiter) {
        let bus = InMemoryEventBus::new();
        let awaiter = EventAwaiter::start(Arc::new(bus.clone()), AwaiterConfig::default());
        (bus, awaiter)
    }

    fn event(event_type: &str, cid: &CorrelationId) -> EventEnvelope {
        EventEnvelope::new(event_type, cid.clone(), json!({}))
    }

    struct RejectingSource;

    #[async_trait]
    impl EventSource for RejectingSource {
        async fn subscribe(
            &self,
            _event_type: &str,
            _handler: Arc<dyn EventHandler>,
        ) -> messaging::Result<SubscriptionId> {
            Err(MessagingError::Handler("no subscriptions".to_string()))
        }

        async fn unsubscribe(
            &self,
            _event_type: &str,
            _subscription: SubscriptionId,
        ) -> messaging::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registered_waiter_receives_matching_event() {
        let (bus, awaiter) = engine();
        let cid = CorrelationId::from("c-1");
        let mut pending = awaiter
            .register(cid.clone(), &["Done"], Duration::from_secs(1))
            .await
            .unwrap();

        bus.publish(event("Done", &cid)).await;

        let awaited = pending.wait().await.unwrap();
        assert!(awaited.is("Done"));
        assert_eq!(awaited.event.correlation_id, cid);
        assert_eq!(awaiter.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_other_event_types_do_not_resolve() {
        let (bus, awaiter) = engine();
        let cid = CorrelationId::from("c-1");
        let mut pending = awaiter
            .register(cid.clone(), &["Done"], Duration::from_millis(50))
            .await
            .unwrap();

        bus.publish(event("Other", &cid)).await;

        assert!(pending.wait().await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_duplicate_waiter_is_rejected() {
        let (_bus, awaiter) = engine();
        let cid = CorrelationId::from("dup");
        let _first = awaiter
            .register(cid.clone(), &["Done"], Duration::from_secs(1))
            .await
            .unwrap();

        let second = awaiter.register(cid, &["Done"], Duration::from_secs(1)).await;
        assert!(matches!(second, Err(AwaitError::DuplicateWaiter(_))));
    }

    #[tokio::test]
    async fn test_empty_event_types_rejected() {
        let (_bus, awaiter) = engine();
        let result = awaiter
            .register(CorrelationId::new(), &[], Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(AwaitError::NoEventTypes)));
    }

    #[tokio::test]
    async fn test_zero_timeout_uses_default() {
        let bus = InMemoryEventBus::new();
        let awaiter = EventAwaiter::start(
            Arc::new(bus),
            AwaiterConfig::default().with_default_timeout(Duration::from_millis(40)),
        );
        let pending = awaiter
            .register(CorrelationId::new(), &["Done"], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(pending.timeout(), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_subscription_failure_leaves_no_waiter() {
        let awaiter = EventAwaiter::start(Arc::new(RejectingSource), AwaiterConfig::default());
        let cid = CorrelationId::new();

        let result = awaiter.register(cid.clone(), &["Done"], Duration::from_secs(1)).await;

        assert!(matches!(result, Err(AwaitError::Subscription(_))));
        assert_eq!(awaiter.pending_count(), 0);
        assert_eq!(awaiter.subscription_count("Done").await, 0);
        // The id is free again.
        assert!(matches!(
            awaiter.register(cid, &["Done"], Duration::from_secs(1)).await,
            Err(AwaitError::Subscription(_))
        ));
    }

    #[tokio::test]
    async fn test_shared_subscription_is_ref_counted() {
        let (bus, awaiter) = engine();
        let mut a = awaiter
            .register(CorrelationId::from("a"), &["Done"], Duration::from_secs(1))
            .await
            .unwrap();
        let mut b = awaiter
            .register(CorrelationId::from("b"), &["Done"], Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(bus.subscriber_count("Done").await, 1);
        assert_eq!(awaiter.subscription_count("Done").await, 2);

        a.release().await;
        assert_eq!(bus.subscriber_count("Done").await, 1);
        b.release().await;
        assert_eq!(bus.subscriber_count("Done").await, 0);
    }

    #[tokio::test]
    async fn test_dropped_pending_await_releases_subscription() {
        let (bus, awaiter) = engine();
        let pending = awaiter
            .register(CorrelationId::new(), &["Done"], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(awaiter.pending_count(), 1);

        drop(pending);
        assert_eq!(awaiter.pending_count(), 0);

        // Teardown runs on a spawned task.
        for _ in 0..50 {
            if bus.subscriber_count("Done").await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.subscriber_count("Done").await, 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_returns_false() {
        let (_bus, awaiter) = engine();
        assert!(!awaiter.cancel(&CorrelationId::from("nobody")));
    }

    #[tokio::test]
    async fn test_sweep_removes_orphans_past_grace() {
        let bus = InMemoryEventBus::new();
        let awaiter = EventAwaiter::start(
            Arc::new(bus.clone()),
            AwaiterConfig::default().with_orphan_grace(Duration::ZERO),
        );
        let cid = CorrelationId::from("orphan");
        let mut pending = awaiter
            .register(cid.clone(), &["Done"], Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(awaiter.sweep().await, 1);
        assert_eq!(awaiter.pending_count(), 0);
        assert_eq!(bus.subscriber_count("Done").await, 0);

        let err = pending.wait().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.correlation_id(), Some(&cid));
        // Releasing again after the sweep must not underflow the refcount.
        assert_eq!(awaiter.subscription_count("Done").await, 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_young_waiters() {
        let (_bus, awaiter) = engine();
        let _pending = awaiter
            .register(CorrelationId::new(), &["Done"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(awaiter.sweep().await, 0);
        assert_eq!(awaiter.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_rejects_registration() {
        let (_bus, awaiter) = engine();
        awaiter.stop(Duration::from_secs(1)).await.unwrap();
        awaiter.stop(Duration::from_secs(1)).await.unwrap();
        assert!(awaiter.is_stopped());

        let result = awaiter
            .register(CorrelationId::new(), &["Done"], Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(AwaitError::Stopped { .. })));
    }

    #[tokio::test]
    async fn test_await_multiple_aggregates_errors() {
        let (bus, awaiter) = engine();
        let ok = CorrelationId::from("ok");
        let missing = CorrelationId::from("missing");

        // Arrives while the first await is pending.
        let bus_clone = bus.clone();
        let ok_clone = ok.clone();
        let publisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            bus_clone.publish(event("Done", &ok_clone)).await;
        });

        let multi = awaiter
            .await_multiple(vec![
                AwaitSpec::new(ok.clone(), "Done").with_timeout(Duration::from_secs(1)),
                AwaitSpec::new(missing, "Done").with_timeout(Duration::from_millis(30)),
            ])
            .await;
        publisher.await.unwrap();

        assert!(!multi.all_succeeded());
        assert_eq!(multi.events().len(), 1);
        assert_eq!(multi.events()[0].correlation_id, ok);
        match multi.into_result() {
            Err(AwaitError::Multiple(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].is_timeout());
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }
}
