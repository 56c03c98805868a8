//! Time-bounded result cache.
//!
//! Sharded LRU keyed by template identity, the canonical form of the
//! parameters the template consumed and a fingerprint of the SQL they
//! resolved to. Entries carry their own ttl and are
//! checked lazily on lookup; nothing sweeps in the background.
//!
//! Concurrent misses on one key are collapsed: the first caller computes while
//! the others wait on a per-key gate, then re-check the cache. Failed computes
//! are never stored, so the next waiter simply tries again.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use serde::Serialize;
use tracing::debug;

use crate::registry::QueryAddress;
use crate::resolve::ResolvedQuery;
use crate::types::{MetricTable, ParameterSet};

/// Number of cache shards (power of 2 for cheap modulo).
pub const NUM_SHARDS: usize = 16;

/// Default capacity per shard.
pub const DEFAULT_CAPACITY_PER_SHARD: usize = 256;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Keys and entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    key: String,
    params: String,
    sql: u64,
}

impl CacheKey {
    pub fn new(address: &QueryAddress, params: &ParameterSet) -> Self {
        Self {
            namespace: address.namespace.clone(),
            key: address.key.clone(),
            params: params.canonical(),
            sql: 0,
        }
    }

    /// Key for a resolved query. Only consumed parameters participate; the
    /// resolved text does too, so a replaced template or another table
    /// mapping gets its own entry.
    pub fn for_query(query: &ResolvedQuery) -> Self {
        Self {
            sql: sql_fingerprint(&query.sql),
            ..Self::new(&query.address, &query.parameters)
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn shard_index(&self) -> usize {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }
}

fn sql_fingerprint(sql: &str) -> u64 {
    let mut hasher = FxHasher::default();
    sql.hash(&mut hasher);
    hasher.finish()
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}?{}#{:016x}",
            self.namespace, self.key, self.params, self.sql
        )
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    table: Arc<MetricTable>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source for entry ages.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub expirations: AtomicU64,
    pub evictions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Hit rate in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        let s = self.snapshot();
        let total = s.hits + s.misses;
        if total == 0 {
            0.0
        } else {
            s.hits as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// ResultCache
// ---------------------------------------------------------------------------

type Gate = Arc<Mutex<()>>;

pub struct ResultCache {
    shards: [Mutex<LruCache<CacheKey, CacheEntry>>; NUM_SHARDS],
    inflight: Mutex<FxHashMap<CacheKey, Gate>>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("len", &self.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_PER_SHARD)
    }
}

impl ResultCache {
    pub fn new(capacity_per_shard: usize) -> Self {
        Self::with_clock(capacity_per_shard, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity_per_shard: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: std::array::from_fn(|_| {
                Mutex::new(LruCache::new(
                    NonZeroUsize::new(capacity_per_shard).unwrap_or(NonZeroUsize::MIN),
                ))
            }),
            inflight: Mutex::new(FxHashMap::default()),
            clock,
            stats: CacheStats::default(),
        }
    }

    /// Return the live entry for `key`, or run `compute`, store its table
    /// with `ttl`, and return it. Errors from `compute` pass through and
    /// leave the cache untouched.
    pub fn get_or_compute<F, E>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<Arc<MetricTable>, E>
    where
        F: FnOnce() -> Result<MetricTable, E>,
    {
        if let Some(table) = self.live(key) {
            self.record_hit(key);
            return Ok(table);
        }

        let gate = self.gate(key);
        let result = {
            let _guard = gate.lock();
            match self.live(key) {
                Some(table) => {
                    self.record_hit(key);
                    Ok(table)
                }
                None => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    compute().map(|table| self.store(key, table, ttl))
                }
            }
        };
        self.release(key, gate);
        result
    }

    /// Cached table for `key` if present and unexpired. Does not compute.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<MetricTable>> {
        let table = self.live(key);
        match &table {
            Some(_) => self.record_hit(key),
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        table
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.shards[key.shard_index()].lock().pop(key).is_some()
    }

    /// Drop every entry under `namespace`.
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let doomed: Vec<CacheKey> = shard
                .iter()
                .filter(|(k, _)| k.namespace == namespace)
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                shard.pop(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Entries currently held, expired ones included until looked up.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log_stats(&self) {
        let s = self.stats.snapshot();
        debug!(
            target: "finq::cache",
            hits = s.hits,
            misses = s.misses,
            expirations = s.expirations,
            evictions = s.evictions,
            hit_rate = format!("{:.1}%", self.stats.hit_rate() * 100.0),
            cached_count = self.len(),
            "Result cache statistics"
        );
    }

    fn live(&self, key: &CacheKey) -> Option<Arc<MetricTable>> {
        let now = self.clock.now();
        let mut shard = self.shards[key.shard_index()].lock();
        match shard.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => return Some(Arc::clone(&entry.table)),
            Some(_) => {}
        }
        shard.pop(key);
        self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache entry expired");
        None
    }

    fn record_hit(&self, key: &CacheKey) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache hit");
    }

    fn store(&self, key: &CacheKey, table: MetricTable, ttl: Duration) -> Arc<MetricTable> {
        let table = Arc::new(table);
        let entry = CacheEntry {
            table: Arc::clone(&table),
            created_at: self.clock.now(),
            ttl,
        };
        let mut shard = self.shards[key.shard_index()].lock();
        if let Some((evicted, _)) = shard.push(key.clone(), entry)
            && &evicted != key
        {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        table
    }

    fn gate(&self, key: &CacheKey) -> Gate {
        Arc::clone(self.inflight.lock().entry(key.clone()).or_default())
    }

    fn release(&self, key: &CacheKey, gate: Gate) {
        let mut inflight = self.inflight.lock();
        // Map plus our own handle: nobody else is waiting.
        if Arc::strong_count(&gate) <= 2 {
            inflight.remove(key);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
