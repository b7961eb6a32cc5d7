//! Concurrent memoization over (sub-DAG edgelist, conditioned prior assignment) pairs.
//!
//! Grounded on `ankurah-ankurah`'s `index/src/reactor.rs`, which keeps a `DashMap` of
//! subscriptions behind a struct that's threaded explicitly through the reactor rather than
//! reached via global state -- the same shape this cache uses for the Conditioning Solver's
//! recursive calls.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;

use crate::belief::BeliefMap;
use crate::error::Result;
use crate::graph::{EdgeId, NodeId};

/// Digest identifying a sub-problem: a canonical edgelist paired with a canonical prior
/// assignment. Two sub-problems with the same digest are guaranteed (up to the strength of
/// BLAKE3) to have produced the same inputs, never merely "close" ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Build a key from a sub-problem's edges and per-node priors. Priors are rounded to
    /// `rounding_bits` of precision before hashing so upstream floating-point noise can't
    /// produce spurious cache misses; the edgelist is sorted so insertion order never
    /// matters.
    pub fn new(edges: &[EdgeId], priors: &[(NodeId, f64)], rounding_bits: u32) -> Self {
        let mut canonical_edges = edges.to_vec();
        canonical_edges.sort_unstable();

        let mut canonical_priors: Vec<(NodeId, f64)> = priors
            .iter()
            .map(|&(node, prior)| (node, round_to_bits(prior, rounding_bits)))
            .collect();
        canonical_priors.sort_unstable_by_key(|&(node, _)| node);

        let mut hasher = blake3::Hasher::new();
        for &(src, dst) in &canonical_edges {
            hasher.update(&src.get().to_le_bytes());
            hasher.update(&dst.get().to_le_bytes());
        }
        hasher.update(b"|priors|");
        for &(node, prior) in &canonical_priors {
            hasher.update(&node.get().to_le_bytes());
            hasher.update(&prior.to_bits().to_le_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

/// Round to a fixed binary precision so that floating-point noise in upstream computation
/// never produces distinct cache keys for what is semantically the same prior.
fn round_to_bits(value: f64, bits: u32) -> f64 {
    let scale = (1u64 << bits.min(52)) as f64;
    (value * scale).round() / scale
}

struct CacheEntry {
    belief: BeliefMap,
    last_used: AtomicU64,
}

/// Concurrent, insert-once memoization cache. Shared by reference among recursive
/// Conditioning Solver / Belief Engine invocations within a single `propagate` call; never
/// mutated after the call returns, never reached through global state.
pub struct BeliefCache {
    entries: DashMap<CacheKey, CacheEntry>,
    capacity: Option<usize>,
    clock: AtomicU64,
}

impl BeliefCache {
    /// Create a cache. `capacity` of `None` leaves it unbounded for the run; `Some(n)` bounds
    /// it to `n` entries via LRU eviction, since every evicted result is always recomputable.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Fetch a cached result without computing one, bumping its recency on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<BeliefMap> {
        let entry = self.entries.get(key)?;
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Some(entry.belief.clone())
    }

    /// Return the cached belief map for `key`, computing it via `compute` on a miss.
    ///
    /// At most one caller ever runs `compute` for a given key: `DashMap::entry` holds the
    /// shard lock for the key across the whole vacant-to-occupied transition, so a second
    /// thread racing on the same key blocks until the first finishes and then observes its
    /// result instead of recomputing.
    pub fn get_or_compute(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<BeliefMap>,
    ) -> Result<BeliefMap> {
        match self.entries.entry(key) {
            DashEntry::Occupied(occupied) => {
                tracing::debug!(key = ?key.0, "memoization cache hit");
                occupied
                    .get()
                    .last_used
                    .store(self.tick(), Ordering::Relaxed);
                Ok(occupied.get().belief.clone())
            }
            DashEntry::Vacant(vacant) => {
                tracing::debug!(key = ?key.0, "memoization cache miss");
                let belief = compute()?;
                vacant.insert(CacheEntry {
                    belief: belief.clone(),
                    last_used: AtomicU64::new(self.tick()),
                });
                self.evict_if_over_capacity();
                Ok(belief)
            }
        }
    }

    fn evict_if_over_capacity(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_used.load(Ordering::Relaxed))
                .map(|entry| *entry.key());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
