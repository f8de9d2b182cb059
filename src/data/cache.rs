//! Expiring key/value store shared by every upstream source.
//!
//! Validity is checked on every read, so an entry past its TTL is never
//! served even if [`TtlCache::sweep`] has not run yet. The map sits behind a
//! single `std::sync::Mutex` that only guards in-memory bookkeeping; callers
//! fetch from the network *outside* the lock and `set` afterwards.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// One cached payload with its expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub payload: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

pub struct TtlCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    max_entries: usize,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        TtlCache {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_entries: max_entries.max(1),
        }
    }

    /// A poisoned lock means a panic happened mid-update elsewhere; the
    /// cache then behaves as if empty rather than propagating it.
    fn lock(&self) -> Option<MutexGuard<'_, CacheInner<K, V>>> {
        match self.inner.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("cache lock poisoned, treating lookup as a miss");
                None
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock()?;
        let now = Instant::now();

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if entry.is_valid(now) => {
                entry.access_count += 1;
                let payload = entry.payload.clone();
                inner.hits += 1;
                return Some(payload);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            debug!("cache entry {:?} expired", key);
        }
        inner.misses += 1;
        None
    }

    /// Store `value` for `ttl`. A zero TTL stores nothing.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let Some(mut inner) = self.lock() else {
            return;
        };
        let now = Instant::now();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            let before = inner.entries.len();
            inner.entries.retain(|_, e| e.is_valid(now));
            inner.evictions += (before - inner.entries.len()) as u64;

            if inner.entries.len() >= self.max_entries {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.created_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    inner.entries.remove(&oldest);
                    inner.evictions += 1;
                }
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                payload: value,
                created_at: now,
                ttl,
                access_count: 0,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.is_valid(now));
        let removed = before - inner.entries.len();
        inner.evictions += removed as u64;
        if removed > 0 {
            debug!("cache sweep removed {} expired entries", removed);
        }
        removed
    }

    pub fn access_count(&self, key: &K) -> Option<u64> {
        self.lock()?.entries.get(key).map(|e| e.access_count)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock()
            .map(|inner| CacheStats {
                hits: inner.hits,
                misses: inner.misses,
                evictions: inner.evictions,
                entries: inner.entries.len(),
            })
            .unwrap_or_default()
    }
}
