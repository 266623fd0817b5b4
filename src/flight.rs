//! In-flight request deduplication (single-flight).
//!
//! Without coalescing, two concurrent calls that share a cache key both miss
//! the cache and both invoke the provider — duplicate billable calls. A
//! [`Singleflight`] map guarantees at most one concurrent provider call per
//! cache key: the first caller becomes the *leader* and performs the call;
//! every later caller becomes a *follower* and awaits the leader's broadcast
//! outcome.
//!
//! The map stores only a `broadcast::Receiver`; the single `Sender` lives in
//! the leader's guard. That way a leader that is cancelled mid-flight drops
//! its sender, the channel closes, and followers observe the closure as a
//! provider failure instead of hanging. The guard's `Drop` also clears the
//! map entry, so the next caller for that key leads a fresh flight.

use crate::cache::CacheKey;
use crate::error::ProviderFailure;
use crate::providers::ProviderId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

/// Outcome shared between a leader and its followers.
pub(crate) type FlightResult<T> = Result<T, ProviderFailure>;

type FlightMap<T> = Arc<Mutex<HashMap<CacheKey, broadcast::Receiver<FlightResult<T>>>>>;

/// Either run the operation (leader) or wait for someone already running it.
pub(crate) enum Flight<T> {
    Lead(LeaderGuard<T>),
    Follow(broadcast::Receiver<FlightResult<T>>),
}

/// Held by the leader; publishing the outcome (or being dropped) clears the
/// flight entry so later callers start fresh.
pub(crate) struct LeaderGuard<T> {
    map: FlightMap<T>,
    key: CacheKey,
    sender: broadcast::Sender<FlightResult<T>>,
    finished: bool,
}

impl<T: Clone> LeaderGuard<T> {
    /// Publish the outcome to all followers and clear the flight entry.
    pub fn finish(mut self, outcome: FlightResult<T>) {
        self.map
            .lock()
            .expect("flight lock poisoned")
            .remove(&self.key);
        self.finished = true;
        // No receivers is fine — the leader was alone.
        let _ = self.sender.send(outcome);
    }
}

impl<T> Drop for LeaderGuard<T> {
    fn drop(&mut self) {
        if !self.finished {
            // Leader cancelled before finishing; dropping `sender` right
            // after this closes the channel for any followers.
            self.map
                .lock()
                .expect("flight lock poisoned")
                .remove(&self.key);
        }
    }
}

pub(crate) struct Singleflight<T> {
    inner: FlightMap<T>,
}

impl<T: Clone + Send + 'static> Singleflight<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the flight for `key`, becoming leader if none is in progress.
    pub fn begin(&self, key: &CacheKey) -> Flight<T> {
        let mut flights = self.inner.lock().expect("flight lock poisoned");
        if let Some(rx) = flights.get(key) {
            debug!(fingerprint = %key.fingerprint, "joining in-flight request");
            return Flight::Follow(rx.resubscribe());
        }
        let (sender, rx) = broadcast::channel(1);
        flights.insert(key.clone(), rx);
        Flight::Lead(LeaderGuard {
            map: Arc::clone(&self.inner),
            key: key.clone(),
            sender,
            finished: false,
        })
    }
}

/// Await a leader's outcome as a follower.
pub(crate) async fn follow<T: Clone>(
    mut rx: broadcast::Receiver<FlightResult<T>>,
    provider: ProviderId,
) -> FlightResult<T> {
    match rx.recv().await {
        Ok(outcome) => outcome,
        // Leader dropped without publishing (cancelled task). Surface as a
        // provider failure so the caller can retry instead of hanging.
        Err(_) => Err(ProviderFailure::new(
            provider,
            "in-flight request was cancelled before completing",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::options::OperationKind;

    fn key() -> CacheKey {
        CacheKey {
            fingerprint: Fingerprint::ephemeral(),
            kind: OperationKind::Ocr,
            options_json: "{}".into(),
        }
    }

    #[tokio::test]
    async fn follower_receives_leader_outcome() {
        let flights: Singleflight<u32> = Singleflight::new();
        let k = key();

        let Flight::Lead(guard) = flights.begin(&k) else {
            panic!("first caller must lead");
        };
        let Flight::Follow(rx) = flights.begin(&k) else {
            panic!("second caller must follow");
        };

        guard.finish(Ok(42));
        assert_eq!(follow(rx, ProviderId::Local).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn finish_clears_the_flight() {
        let flights: Singleflight<u32> = Singleflight::new();
        let k = key();

        let Flight::Lead(guard) = flights.begin(&k) else {
            panic!("expected leader");
        };
        guard.finish(Ok(1));

        // A new caller for the same key leads again.
        assert!(matches!(flights.begin(&k), Flight::Lead(_)));
    }

    #[tokio::test]
    async fn dropped_leader_surfaces_as_failure() {
        let flights: Singleflight<u32> = Singleflight::new();
        let k = key();

        let Flight::Lead(guard) = flights.begin(&k) else {
            panic!("expected leader");
        };
        let Flight::Follow(rx) = flights.begin(&k) else {
            panic!("expected follower");
        };
        drop(guard); // leader cancelled without finish()

        let err = follow(rx, ProviderId::Local).await.unwrap_err();
        assert!(err.message.contains("cancelled"));

        // The entry was cleared; the next caller leads again.
        assert!(matches!(flights.begin(&k), Flight::Lead(_)));
    }

    #[tokio::test]
    async fn failures_are_broadcast_too() {
        let flights: Singleflight<u32> = Singleflight::new();
        let k = key();

        let Flight::Lead(guard) = flights.begin(&k) else {
            panic!("expected leader");
        };
        let Flight::Follow(rx) = flights.begin(&k) else {
            panic!("expected follower");
        };
        guard.finish(Err(ProviderFailure::new(ProviderId::Google, "boom")));

        let err = follow(rx, ProviderId::Google).await.unwrap_err();
        assert_eq!(err.message, "boom");
    }
}
