use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match (now - self.fetched_at).to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => true, // fetched "in the future" after a clock step back
        }
    }
}

/// Bounded TTL cache keyed by request
///
/// Expired entries are kept so they can still be served flagged stale;
/// only capacity pressure evicts (oldest fetch first).
#[derive(Debug)]
pub struct SnapshotCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    capacity: usize,
}

impl<V: Clone> SnapshotCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: String, value: V, ttl: Duration, now: DateTime<Utc>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                fetched_at: now,
                ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entry_goes_stale_but_stays() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut cache = SnapshotCache::new(4);
        cache.insert("EUR/USD".into(), 1.08, Duration::from_secs(60), t0);

        let entry = cache.get("EUR/USD").unwrap();
        assert!(entry.is_fresh(t0 + chrono::Duration::seconds(59)));
        assert!(!entry.is_fresh(t0 + chrono::Duration::seconds(60)));
        assert_eq!(entry.value, 1.08);
    }

    #[test]
    fn test_capacity_evicts_oldest_fetch() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ttl = Duration::from_secs(300);
        let mut cache = SnapshotCache::new(2);

        cache.insert("a".into(), 1, ttl, t0);
        cache.insert("b".into(), 2, ttl, t0 + chrono::Duration::seconds(1));
        // Refreshing an existing key never evicts
        cache.insert("a".into(), 3, ttl, t0 + chrono::Duration::seconds(2));
        assert_eq!(cache.len(), 2);

        cache.insert("c".into(), 4, ttl, t0 + chrono::Duration::seconds(3));
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").map(|e| e.value), Some(3));
        assert_eq!(cache.get("c").map(|e| e.value), Some(4));
    }
}
