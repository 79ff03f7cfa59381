//! Result caches.
//!
//! [`ComputeCache`] maps `(graph, plug, hash)` keys to computed values and
//! makes sure each key is computed at most once at a time: the first caller to miss
//! becomes the owner of the computation, and callers arriving while it runs
//! block until the owner publishes, then receive the same result.
//!
//! [`HashCache`] memoizes plug hashes per `(plug, dirty count, context)`,
//! along with the dirty counts of any other plugs the hash read.
//! [`PlugCounters`] records per-plug compute and hash counts.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{ComputationAbandoned, ComputeError};
use crate::hash::Digest;
use crate::plug::PlugId;
use crate::value::Value;

/// Key of a computed value: the graph, the plug and the hash of everything
/// it depends on.
///
/// Plug ids are only unique within one graph, so the graph id keeps graphs
/// sharing a cache apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputeKey {
    /// Id of the graph owning the plug. See [`Graph::id`](crate::Graph::id).
    pub graph: u64,
    /// The output plug.
    pub plug: PlugId,
    /// Hash of the output in the evaluation context.
    pub hash: Digest,
}

impl ComputeKey {
    /// Create a key.
    pub fn new(graph: u64, plug: PlugId, hash: Digest) -> Self {
        Self { graph, plug, hash }
    }
}

/// How a cache lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lookup {
    /// The value was already published.
    Hit,
    /// Another caller was computing the value; this caller waited for it.
    Joined,
    /// This caller computed the value.
    Computed,
}

/// Snapshot of [`ComputeCache`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Published entries.
    pub entries: usize,
    /// Maximum number of published entries.
    pub capacity: usize,
    /// Computations currently running.
    pub in_flight: usize,
    /// Lookups satisfied by a published entry.
    pub hits: u64,
    /// Lookups that started a computation.
    pub misses: u64,
    /// Lookups that joined a running computation.
    pub collaborations: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
}

type Outcome = Result<Value, ComputeError>;

/// A running computation that other callers can wait on.
struct InFlight {
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, outcome: Outcome) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(outcome) = outcome.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut outcome);
        }
    }
}

/// Cache of computed values with task collaboration.
///
/// Failures are delivered to every waiter but never published, so the next
/// request for the same key computes again.
pub struct ComputeCache {
    entries: Mutex<LruCache<ComputeKey, Value>>,
    in_flight: Mutex<ahash::HashMap<ComputeKey, Arc<InFlight>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    collaborations: AtomicU64,
    evictions: AtomicU64,
}

impl fmt::Debug for ComputeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeCache")
            .field("statistics", &self.statistics())
            .finish()
    }
}

impl Default for ComputeCache {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CACHE_CAPACITY)
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl ComputeCache {
    /// Create a cache holding at most `capacity` values. Zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(non_zero(capacity))),
            in_flight: Mutex::new(ahash::HashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            collaborations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// The published value for `key`, if any.
    pub fn get(&self, key: &ComputeKey) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    /// Return the value for `key`, computing it with `compute` if needed.
    ///
    /// At most one `compute` runs per key at a time. Callers arriving while it
    /// runs block and receive its result. If `compute` panics, waiters receive
    /// a [`ComputationAbandoned`] error and the panic continues in the owner.
    pub fn get_or_compute<F>(&self, key: ComputeKey, compute: F) -> (Outcome, Lookup)
    where
        F: FnOnce() -> Outcome,
    {
        let flight = {
            let mut in_flight = self.in_flight.lock();
            if let Some(flight) = in_flight.get(&key) {
                let flight = flight.clone();
                drop(in_flight);
                self.collaborations.fetch_add(1, Ordering::Relaxed);
                return (flight.wait(), Lookup::Joined);
            }
            // Checked under the registry lock so a value published between a
            // miss and registration is not computed twice.
            if let Some(value) = self.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return (Ok(value), Lookup::Hit);
            }
            let flight = Arc::new(InFlight::new());
            in_flight.insert(key, flight.clone());
            flight
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut owner = Owner {
            cache: self,
            key,
            flight,
            finished: false,
        };
        let outcome = compute();
        if let Ok(value) = &outcome {
            self.publish(key, value.clone());
        }
        owner.finish(outcome.clone());
        (outcome, Lookup::Computed)
    }

    fn publish(&self, key: ComputeKey, value: Value) {
        if let Some((evicted, _)) = self.entries.lock().push(key, value) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop every published value. Running computations are unaffected.
    pub fn clear(&self) {
        self.entries.lock().clear();
        log::debug!("compute cache cleared");
    }

    /// Drop published values of the given plugs of graph `graph`. Returns how
    /// many were dropped.
    pub fn remove_plugs(&self, graph: u64, plugs: &HashSet<PlugId, ahash::RandomState>) -> usize {
        if plugs.is_empty() {
            return 0;
        }
        let mut entries = self.entries.lock();
        let stale: Vec<ComputeKey> = entries
            .iter()
            .filter(|(key, _)| key.graph == graph && plugs.contains(&key.plug))
            .map(|(key, _)| *key)
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    /// Number of published values.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of published values.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Change the capacity, evicting least recently used values if needed.
    pub fn set_capacity(&self, capacity: usize) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.resize(non_zero(capacity));
        let dropped = before.saturating_sub(entries.len());
        self.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// Current counters.
    pub fn statistics(&self) -> CacheStatistics {
        let (entries, capacity) = {
            let entries = self.entries.lock();
            (entries.len(), entries.cap().get())
        };
        CacheStatistics {
            entries,
            capacity,
            in_flight: self.in_flight.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            collaborations: self.collaborations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Owner side of a computation. Releases waiters even if the owner unwinds.
struct Owner<'a> {
    cache: &'a ComputeCache,
    key: ComputeKey,
    flight: Arc<InFlight>,
    finished: bool,
}

impl Owner<'_> {
    fn finish(&mut self, outcome: Outcome) {
        self.finished = true;
        self.flight.finish(outcome);
        self.cache.in_flight.lock().remove(&self.key);
    }
}

impl Drop for Owner<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let error = ComputeError::new(
                self.key.plug,
                format!("{:?}", self.key.plug),
                ComputationAbandoned.into(),
            );
            self.finish(Err(error));
        }
    }
}

/// Key of a memoized hash. The dirty count changes whenever an input that
/// affects the plug changes, so those entries are never looked up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HashKey {
    pub(crate) plug: PlugId,
    pub(crate) dirty_count: u64,
    pub(crate) context: Digest,
}

/// A memoized hash and the plugs it read outside the plug's dependencies,
/// with their dirty counts at the time. The memo is only valid while those
/// counts are unchanged.
#[derive(Debug, Clone)]
pub(crate) struct HashMemo {
    pub(crate) digest: Digest,
    pub(crate) reads: Arc<[(PlugId, u64)]>,
}

/// Bounded memo of plug hashes.
pub(crate) struct HashCache {
    entries: Mutex<LruCache<HashKey, HashMemo>>,
}

impl HashCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(non_zero(capacity))),
        }
    }

    pub(crate) fn get(&self, key: &HashKey) -> Option<HashMemo> {
        self.entries.lock().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: HashKey, memo: HashMemo) {
        self.entries.lock().put(key, memo);
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn set_capacity(&self, capacity: usize) {
        self.entries.lock().resize(non_zero(capacity));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[derive(Default)]
struct Counts {
    computes: AtomicU64,
    hashes: AtomicU64,
}

/// Per-plug compute and hash counters.
pub(crate) struct PlugCounters {
    counts: papaya::HashMap<PlugId, Arc<Counts>, ahash::RandomState>,
}

impl PlugCounters {
    pub(crate) fn new() -> Self {
        Self {
            counts: papaya::HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    fn entry(&self, plug: PlugId) -> Arc<Counts> {
        let pinned = self.counts.pin();
        pinned.get_or_insert_with(plug, || Arc::new(Counts::default())).clone()
    }

    pub(crate) fn record_compute(&self, plug: PlugId) {
        self.entry(plug).computes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hash(&self, plug: PlugId) {
        self.entry(plug).hashes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn computes(&self, plug: PlugId) -> u64 {
        let pinned = self.counts.pin();
        pinned
            .get(&plug)
            .map_or(0, |c| c.computes.load(Ordering::Relaxed))
    }

    pub(crate) fn hashes(&self, plug: PlugId) -> u64 {
        let pinned = self.counts.pin();
        pinned.get(&plug).map_or(0, |c| c.hashes.load(Ordering::Relaxed))
    }

    pub(crate) fn remove(&self, plug: PlugId) {
        let pinned = self.counts.pin();
        pinned.remove(&plug);
    }

    pub(crate) fn clear(&self) {
        let pinned = self.counts.pin();
        pinned.clear();
    }
}
