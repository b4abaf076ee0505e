//! Time-bounded read cache for knowledge base lookups.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::Symptom;

/// Cache key under which the full symptom list is stored.
pub const SYMPTOM_CACHE_KEY: &str = "kb:all_symptoms";

/// How long a loaded symptom list stays fresh.
pub const DEFAULT_SYMPTOM_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cache holding the full, ordered symptom list.
pub type SymptomCache = TtlCache<Arc<Vec<Symptom>>>;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Keyed cache whose entries expire a fixed time after they are stored.
///
/// Values are published whole and never mutated afterwards; a refresh
/// replaces the entry. The lock only guards the pointer swap; concurrent
/// refreshers may both load and the last writer wins.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<&'static str, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    /// Create an empty cache with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, or `None` when absent or expired.
    pub fn get(&self, key: &'static str) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: &'static str, value: V) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_SYMPTOM_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SymptomCategory;

    fn symptom(id: i64, name: &str) -> Symptom {
        Symptom {
            id,
            name: name.to_string(),
            category: SymptomCategory::General,
            severity_weight: 1,
        }
    }

    #[test]
    fn test_get_on_empty_cache_misses() {
        let cache: SymptomCache = TtlCache::default();
        assert!(cache.get(SYMPTOM_CACHE_KEY).is_none());
        assert_eq!(cache.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_insert_then_get_returns_same_snapshot() {
        let cache: SymptomCache = TtlCache::new(Duration::from_secs(60));
        let snapshot = Arc::new(vec![symptom(1, "Fever")]);
        cache.insert(SYMPTOM_CACHE_KEY, snapshot.clone());

        let cached = cache.get(SYMPTOM_CACHE_KEY).expect("entry should be fresh");
        assert!(Arc::ptr_eq(&cached, &snapshot));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache: SymptomCache = TtlCache::new(Duration::ZERO);
        cache.insert(SYMPTOM_CACHE_KEY, Arc::new(vec![symptom(1, "Fever")]));
        assert!(cache.get(SYMPTOM_CACHE_KEY).is_none());
    }

    #[test]
    fn test_insert_replaces_whole_entry() {
        let cache: SymptomCache = TtlCache::new(Duration::from_secs(60));
        cache.insert(SYMPTOM_CACHE_KEY, Arc::new(vec![symptom(1, "Fever")]));
        cache.insert(
            SYMPTOM_CACHE_KEY,
            Arc::new(vec![symptom(1, "Fever"), symptom(2, "Cough")]),
        );

        let cached = cache.get(SYMPTOM_CACHE_KEY).unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[test]
    fn test_concurrent_refreshers_leave_a_full_snapshot() {
        let cache: Arc<SymptomCache> = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let snapshot: Vec<Symptom> =
                        (0..=n).map(|i| symptom(i, &format!("S{}", i))).collect();
                    cache.insert(SYMPTOM_CACHE_KEY, Arc::new(snapshot));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let cached = cache.get(SYMPTOM_CACHE_KEY).unwrap();
        // Whichever writer won, its snapshot is complete: ids 0..=n in order.
        for (i, s) in cached.iter().enumerate() {
            assert_eq!(s.id, i as i64);
        }
    }
}
