// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fingerprint-keyed result cache.
//
// Entries are serialised outcomes bounded by total bytes, evicted least
// recently used first, and expire after a per-entry TTL. Concurrent lookups
// for a fingerprint that is still being built wait for that build instead of
// starting their own.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lesewerk_core::config::CacheConfig;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;

/// Entries examined from the least recently used end per purge.
const PURGE_SWEEP: usize = 8;

/// A cached, serialised outcome.
pub type Payload = std::sync::Arc<[u8]>;

/// Counters and sizes reported by [`CacheManager::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
    /// Lookups that waited on an in-flight build.
    pub coalesced: u64,
    pub resident_size: usize,
    pub entries: usize,
    pub capacity: usize,
}

struct Entry {
    payload: Payload,
    expires_at: Instant,
}

#[derive(Clone)]
enum BuildState {
    Building,
    Ready(Payload),
    Abandoned,
}

struct CacheState {
    entries: LruCache<Fingerprint, Entry>,
    resident: usize,
    stats: CacheStats,
    inflight: HashMap<Fingerprint, watch::Sender<BuildState>>,
}

impl CacheState {
    fn remove(&mut self, key: &Fingerprint) -> Option<Entry> {
        let entry = self.entries.pop(key)?;
        self.resident -= entry.payload.len();
        Some(entry)
    }

    /// Live payload for `key`, promoted to most recently used.
    fn live(&mut self, key: &Fingerprint, now: Instant) -> Option<Payload> {
        let expired = self.entries.peek(key)?.expires_at <= now;
        if expired {
            self.remove(key);
            self.stats.expirations += 1;
            return None;
        }
        self.entries.get(key).map(|entry| entry.payload.clone())
    }

    /// Drop expired entries among the [`PURGE_SWEEP`] least recently used.
    /// Entries deeper in the list expire lazily on lookup.
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<Fingerprint> = self
            .entries
            .iter()
            .rev()
            .take(PURGE_SWEEP)
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
            self.stats.expirations += 1;
        }
    }

    fn insert(&mut self, key: Fingerprint, payload: Payload, expires_at: Instant, capacity: usize) -> bool {
        let size = payload.len();
        self.remove(&key);
        if size > capacity {
            warn!(fingerprint = %key, size, capacity, "Payload larger than cache capacity; not cached");
            return false;
        }

        if self.resident + size > capacity {
            self.purge_expired(Instant::now());
        }
        while self.resident + size > capacity {
            let Some((evicted, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.resident -= entry.payload.len();
            self.stats.evictions += 1;
            debug!(fingerprint = %evicted, size = entry.payload.len(), "Evicted cache entry");
        }

        self.entries.put(key, Entry { payload, expires_at });
        self.resident += size;
        true
    }
}

/// What [`CacheManager::acquire`] found.
pub enum Lookup<'a> {
    /// A cached payload, or one just built by a concurrent caller.
    Hit(Payload),
    /// Nothing cached; this caller builds and must resolve the guard.
    Build(BuildGuard<'a>),
}

/// Byte-bounded LRU cache with TTL and build coalescing.
pub struct CacheManager {
    state: Mutex<CacheState>,
    capacity: usize,
    default_ttl: Duration,
}

impl CacheManager {
    pub fn new(capacity_bytes: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                resident: 0,
                stats: CacheStats::default(),
                inflight: HashMap::new(),
            }),
            capacity: capacity_bytes,
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity_bytes, Duration::from_secs(config.ttl_secs))
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry, counting a hit or a miss.
    pub fn get(&self, key: &Fingerprint) -> Option<Payload> {
        let mut state = self.lock();
        let found = state.live(key, Instant::now());
        if found.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        found
    }

    /// Store `payload` under `key`. `ttl` defaults to the configured TTL.
    ///
    /// Returns `false` when the payload alone exceeds the capacity.
    pub fn set(&self, key: Fingerprint, payload: impl Into<Payload>, ttl: Option<Duration>) -> bool {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.lock().insert(key, payload.into(), expires_at, self.capacity)
    }

    pub fn remove(&self, key: &Fingerprint) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            resident_size: state.resident,
            entries: state.entries.len(),
            capacity: self.capacity,
            ..state.stats
        }
    }

    /// Return the cached payload, wait for an in-flight build of the same
    /// key, or claim the build.
    ///
    /// Each call counts exactly once: a hit, a miss (the caller builds), or
    /// a coalesced wait. A waiter whose builder gives up tries again.
    pub async fn acquire(&self, key: &Fingerprint) -> Lookup<'_> {
        let mut counted = false;
        loop {
            let mut rx = {
                let mut guard = self.lock();
                let state = &mut *guard;
                if let Some(payload) = state.live(key, Instant::now()) {
                    if !counted {
                        state.stats.hits += 1;
                    }
                    return Lookup::Hit(payload);
                }
                match state.inflight.get(key) {
                    Some(tx) => {
                        if !counted {
                            state.stats.coalesced += 1;
                            counted = true;
                        }
                        tx.subscribe()
                    }
                    None => {
                        if !counted {
                            state.stats.misses += 1;
                        }
                        let (tx, _) = watch::channel(BuildState::Building);
                        state.inflight.insert(key.clone(), tx);
                        return Lookup::Build(BuildGuard {
                            cache: self,
                            key: key.clone(),
                            resolved: false,
                        });
                    }
                }
            };

            debug!(fingerprint = %key, "Waiting on in-flight build");
            let settled = rx
                .wait_for(|state| !matches!(state, BuildState::Building))
                .await
                .map(|state| (*state).clone());
            match settled {
                Ok(BuildState::Ready(payload)) => return Lookup::Hit(payload),
                _ => debug!(fingerprint = %key, "In-flight build abandoned; retrying lookup"),
            }
        }
    }
}

/// Claim on building one fingerprint.
///
/// Resolve it with [`complete`](Self::complete) to cache the result, or with
/// [`share`](Self::share) to hand the result to waiters without caching it.
/// Dropping the guard unresolved wakes the waiters so one of them can build
/// instead.
pub struct BuildGuard<'a> {
    cache: &'a CacheManager,
    key: Fingerprint,
    resolved: bool,
}

impl BuildGuard<'_> {
    pub fn key(&self) -> &Fingerprint {
        &self.key
    }

    /// Store the built payload and hand it to every waiter.
    ///
    /// Returns whether the payload was stored.
    pub fn complete(mut self, payload: impl Into<Payload>, ttl: Option<Duration>) -> bool {
        let payload = payload.into();
        let expires_at = Instant::now() + ttl.unwrap_or(self.cache.default_ttl);
        let (stored, tx) = {
            let mut state = self.cache.lock();
            let stored = state.insert(self.key.clone(), payload.clone(), expires_at, self.cache.capacity);
            (stored, state.inflight.remove(&self.key))
        };
        self.resolve(tx, BuildState::Ready(payload));
        stored
    }

    /// Hand the built payload to every current waiter without storing it.
    pub fn share(mut self, payload: impl Into<Payload>) {
        let tx = self.cache.lock().inflight.remove(&self.key);
        self.resolve(tx, BuildState::Ready(payload.into()));
    }

    fn resolve(&mut self, tx: Option<watch::Sender<BuildState>>, state: BuildState) {
        self.resolved = true;
        if let Some(tx) = tx {
            tx.send_replace(state);
        }
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let tx = self.cache.lock().inflight.remove(&self.key);
        self.resolve(tx, BuildState::Abandoned);
    }
}
