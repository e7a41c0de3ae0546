//! Cache-or-compute wrapper around producer calls.
//!
//! [`with_cache`] serves a fresh cached value when one exists and otherwise
//! runs the producer, caching only successful results.
//!
//! By default there is no in-flight de-duplication: two concurrent
//! requests for the same uncached key both run the producer and the last
//! write wins. Caches built with
//! [`CacheConfig::single_flight`](super::CacheConfig::single_flight) route
//! requests through an [`InFlight`] registry instead, so requests for one
//! key take turns and later ones find the first one's result.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::NamedCache;
use crate::key::{CacheKey, Fingerprint};
use crate::telemetry;

/// A value plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cached<V> {
    pub data: V,
    pub from_cache: bool,
}

impl<V> Cached<V> {
    pub fn hit(data: V) -> Self {
        Self {
            data,
            from_cache: true,
        }
    }

    pub fn miss(data: V) -> Self {
        Self {
            data,
            from_cache: false,
        }
    }

    /// Transform the payload, keeping the provenance flag.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Cached<U> {
        Cached {
            data: f(self.data),
            from_cache: self.from_cache,
        }
    }
}

/// Return the cached value for `key`, or run `producer` and cache its result.
///
/// Producer errors are returned untouched and nothing is cached for them.
pub async fn with_cache<V, E, F, Fut>(
    cache: &NamedCache<V>,
    key: &CacheKey,
    producer: F,
) -> Result<Cached<V>, E>
where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    let fingerprint = key.fingerprint();

    let _turn = match cache.in_flight() {
        Some(in_flight) => Some(in_flight.acquire(fingerprint).await),
        None => None,
    };

    if let Some(data) = cache.get(&fingerprint) {
        return Ok(Cached::hit(data));
    }

    match producer().await {
        Ok(data) => {
            cache.put(fingerprint, data.clone());
            Ok(Cached::miss(data))
        }
        Err(e) => {
            debug!(
                operation = cache.name(),
                user = %key.user().short(),
                "producer failed, result not cached"
            );
            metrics::counter!(telemetry::PRODUCER_ERRORS_TOTAL, "operation" => cache.name().to_owned())
                .increment(1);
            Err(e)
        }
    }
}

/// Per-key turn-taking for concurrent cache misses.
///
/// Holds one async mutex per key that currently has a request in progress
/// or waiting. Each slot counts the requests registered on it and is
/// removed when the last one finishes or is cancelled.
#[derive(Default)]
pub struct InFlight {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
}

struct Slot {
    turn: Arc<tokio::sync::Mutex<()>>,
    registered: usize,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`.
    ///
    /// Dropping the returned future while it waits gives up the place in
    /// line and releases the slot like a finished request would.
    pub async fn acquire(&self, key: Fingerprint) -> InFlightGuard<'_> {
        let turn = {
            let mut slots = self.slots();
            let slot = slots.entry(key).or_insert_with(|| Slot {
                turn: Arc::default(),
                registered: 0,
            });
            slot.registered += 1;
            slot.turn.clone()
        };
        let registration = Registration { owner: self, key };
        let guard = turn.lock_owned().await;
        InFlightGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Number of keys with a request in progress or waiting.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Fingerprint, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One request's claim on a slot, held from `acquire` until release.
struct Registration<'a> {
    owner: &'a InFlight,
    key: Fingerprint,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.slots();
        if let Entry::Occupied(mut slot) = slots.entry(self.key) {
            slot.get_mut().registered -= 1;
            if slot.get().registered == 0 {
                slot.remove();
            }
        }
    }
}

/// Exclusive turn on one key; released on drop.
pub struct InFlightGuard<'a> {
    // Field order matters: the turn is handed on before the slot is
    // deregistered.
    _guard: OwnedMutexGuard<()>,
    _registration: Registration<'a>,
}
