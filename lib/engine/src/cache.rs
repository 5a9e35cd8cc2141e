//! Result cache
//!
//! Maps a [`CheckSignature`] to the existence answer last fetched for it.
//! Entries are written only after a successful round trip. Writes to the
//! underlying store do not invalidate anything; callers that need fresher
//! answers configure a TTL or call [`ResultCache::invalidate_collection`].

use crate::config::CachePolicy;
use ahash::AHashMap;
use fieldguard_core::CheckSignature;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Decides how long cached answers stay usable
pub trait EvictionPolicy: Send + Sync {
    fn is_fresh(&self, stored_at: Instant, now: Instant) -> bool;

    /// Upper bound on cached entries; the oldest entry is dropped first
    fn max_entries(&self) -> Option<usize> {
        None
    }
}

/// Keep everything for the life of the cache
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpire;

impl EvictionPolicy for NeverExpire {
    fn is_fresh(&self, _stored_at: Instant, _now: Instant) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    ttl: Option<Duration>,
    max_entries: Option<usize>,
}

impl TtlPolicy {
    pub fn new(ttl: Option<Duration>, max_entries: Option<usize>) -> Self {
        Self { ttl, max_entries }
    }
}

impl EvictionPolicy for TtlPolicy {
    fn is_fresh(&self, stored_at: Instant, now: Instant) -> bool {
        self.ttl
            .map(|ttl| now.saturating_duration_since(stored_at) < ttl)
            .unwrap_or(true)
    }

    fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    exists: bool,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct ResultCache {
    entries: RwLock<AHashMap<CheckSignature, CacheEntry>>,
    policy: Box<dyn EvictionPolicy>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_policy(Box::new(NeverExpire))
    }

    pub fn with_policy(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_policy(policy: &CachePolicy) -> Self {
        match (policy.ttl(), policy.max_entries) {
            (None, None) => Self::new(),
            (ttl, max_entries) => Self::with_policy(Box::new(TtlPolicy::new(ttl, max_entries))),
        }
    }

    pub fn lookup(&self, signature: &CheckSignature) -> Option<bool> {
        let now = Instant::now();
        let found = self.entries.read().get(signature).copied();

        match found {
            Some(entry) if self.policy.is_fresh(entry.stored_at, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.exists)
            }
            Some(_) => {
                self.entries.write().remove(signature);
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(collection = %signature.collection, "cache entry expired");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn store(&self, signature: CheckSignature, exists: bool) {
        let mut entries = self.entries.write();

        if let Some(max) = self.policy.max_entries() {
            if max == 0 {
                return;
            }
            while entries.len() >= max && !entries.contains_key(&signature) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(key) => {
                        entries.remove(&key);
                    }
                    None => break,
                }
            }
        }

        entries.insert(
            signature,
            CacheEntry {
                exists,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry for `collection`, returning how many were removed
    pub fn invalidate_collection(&self, collection: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|signature, _| signature.collection != collection);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldguard_core::{BackendKind, ExistenceCheck};

    fn signature(collection: &str, value: &str) -> CheckSignature {
        CheckSignature::for_check(
            BackendKind::Document,
            &ExistenceCheck::field(collection, "username", value),
        )
    }

    #[test]
    fn test_lookup_and_store() {
        let cache = ResultCache::new();
        let sig = signature("users", "takenuser");
        assert_eq!(cache.lookup(&sig), None);

        cache.store(sig.clone(), true);
        assert_eq!(cache.lookup(&sig), Some(true));
        assert_eq!(cache.lookup(&signature("users", "other")), None);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 2, entries: 1 });
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ResultCache::with_policy(Box::new(TtlPolicy::new(Some(Duration::ZERO), None)));
        let sig = signature("users", "takenuser");
        cache.store(sig.clone(), true);
        assert_eq!(cache.lookup(&sig), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_policy_freshness() {
        let policy = TtlPolicy::new(Some(Duration::from_secs(10)), None);
        let stored = Instant::now();
        assert!(policy.is_fresh(stored, stored + Duration::from_secs(9)));
        assert!(!policy.is_fresh(stored, stored + Duration::from_secs(10)));
        assert!(TtlPolicy::new(None, None).is_fresh(stored, stored + Duration::from_secs(3600)));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ResultCache::from_policy(&CachePolicy {
            enabled: true,
            ttl_ms: None,
            max_entries: Some(2),
        });
        cache.store(signature("users", "a"), true);
        std::thread::sleep(Duration::from_millis(2));
        cache.store(signature("users", "b"), false);
        std::thread::sleep(Duration::from_millis(2));
        cache.store(signature("users", "c"), true);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&signature("users", "a")), None);
        assert_eq!(cache.lookup(&signature("users", "b")), Some(false));
        assert_eq!(cache.lookup(&signature("users", "c")), Some(true));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = ResultCache::from_policy(&CachePolicy {
            enabled: true,
            ttl_ms: None,
            max_entries: Some(0),
        });
        cache.store(signature("users", "a"), true);
        cache.store(signature("users", "a"), false);

        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&signature("users", "a")), None);
    }

    #[test]
    fn test_invalidate_collection() {
        let cache = ResultCache::new();
        cache.store(signature("users", "a"), true);
        cache.store(signature("users", "b"), true);
        cache.store(signature("teams", "a"), true);

        assert_eq!(cache.invalidate_collection("users"), 2);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
