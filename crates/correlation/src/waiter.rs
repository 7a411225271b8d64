use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use common::CorrelationId;
use messaging::EventEnvelope;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// The event that resolved a wait, together with the type it matched.
#[derive(Debug, Clone)]
pub struct AwaitedEvent {
    pub matched_type: String,
    pub event: EventEnvelope,
}

impl AwaitedEvent {
    /// Returns true if the resolving event had the given type.
    pub fn is(&self, event_type: &str) -> bool {
        self.matched_type == event_type
    }

    pub fn into_event(self) -> EventEnvelope {
        self.event
    }
}

pub(crate) enum Outcome {
    Delivered(AwaitedEvent),
    Cancelled,
    Stopped,
}

/// Registry entry for one pending wait.
///
/// The sender sits in a single-use slot: whoever takes it first decides the
/// outcome, every later attempt is a no-op.
pub(crate) struct Waiter {
    pub(crate) token: u64,
    pub(crate) correlation_id: CorrelationId,
    pub(crate) event_types: Vec<String>,
    pub(crate) registered_at: Instant,
    pub(crate) timeout: Duration,
    slot: Mutex<Option<oneshot::Sender<Outcome>>>,
    released: AtomicBool,
}

impl Waiter {
    pub(crate) fn new(
        token: u64,
        correlation_id: CorrelationId,
        event_types: Vec<String>,
        timeout: Duration,
    ) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let waiter = Self {
            token,
            correlation_id,
            event_types,
            registered_at: Instant::now(),
            timeout,
            slot: Mutex::new(Some(tx)),
            released: AtomicBool::new(false),
        };
        (waiter, rx)
    }

    pub(crate) fn expects(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.registered_at + self.timeout
    }

    /// Resolves the waiter. Returns false if it was already resolved.
    pub(crate) fn resolve(&self, outcome: Outcome) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            // A closed receiver still counts as the one delivery.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drops the sender without an outcome; the receiver reads this as a timeout.
    pub(crate) fn abandon(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Claims the right to release this waiter's subscriptions. Only the
    /// first caller gets true.
    pub(crate) fn claim_release(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter() -> (Waiter, oneshot::Receiver<Outcome>) {
        Waiter::new(
            1,
            CorrelationId::from("c"),
            vec!["A".to_string(), "B".to_string()],
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_resolve_only_once() {
        let (waiter, mut rx) = waiter();
        assert!(waiter.resolve(Outcome::Cancelled));
        assert!(!waiter.resolve(Outcome::Stopped));
        assert!(matches!(rx.try_recv(), Ok(Outcome::Cancelled)));
    }

    #[test]
    fn test_expects_listed_types_only() {
        let (waiter, _rx) = waiter();
        assert!(waiter.expects("A"));
        assert!(waiter.expects("B"));
        assert!(!waiter.expects("C"));
    }

    #[test]
    fn test_claim_release_once() {
        let (waiter, _rx) = waiter();
        assert!(waiter.claim_release());
        assert!(!waiter.claim_release());
    }

    #[test]
    fn test_abandon_closes_channel() {
        let (waiter, mut rx) = waiter();
        waiter.abandon();
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(!waiter.resolve(Outcome::Cancelled));
    }
}
