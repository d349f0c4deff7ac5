//! Short-lived cache of deny decisions.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Inserts between sweeps of expired entries.
const SWEEP_EVERY: usize = 256;

/// Remembers recent denials so a limited caller is turned away locally
/// instead of hitting the service again.
#[derive(Debug)]
pub struct DenyCache {
    ttl: Duration,
    entries: DashMap<String, Instant>,
    inserts: AtomicUsize,
}

impl DenyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn is_denied(&self, key: &str) -> bool {
        self.is_denied_at(key, Instant::now())
    }

    pub(crate) fn is_denied_at(&self, key: &str, now: Instant) -> bool {
        let expired = match self.entries.get(key) {
            None => return false,
            Some(expires_at) => now > *expires_at,
        };
        if expired {
            self.entries.remove_if(key, |_, expires_at| now > *expires_at);
            return false;
        }
        true
    }

    pub fn record_deny(&self, key: &str) {
        self.record_deny_at(key, Instant::now())
    }

    pub(crate) fn record_deny_at(&self, key: &str, now: Instant) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(key.to_string(), now + self.ttl);

        if (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.purge_expired_at(now);
        }
    }

    /// Drop every entry whose TTL has passed, returning how many went.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| now <= *expires_at);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_expires_after_ttl() {
        let cache = DenyCache::new(Duration::from_millis(1000));
        let now = Instant::now();

        assert!(!cache.is_denied_at("p:u1", now));
        cache.record_deny_at("p:u1", now);
        assert!(cache.is_denied_at("p:u1", now + Duration::from_millis(1000)));
        assert!(!cache.is_denied_at("p:u1", now + Duration::from_millis(1001)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_are_independent() {
        let cache = DenyCache::new(Duration::from_secs(1));
        let now = Instant::now();
        cache.record_deny_at("p:u1", now);
        assert!(!cache.is_denied_at("p:u2", now));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_inserts_sweep_expired_entries() {
        let cache = DenyCache::new(Duration::from_millis(1000));
        let start = Instant::now();
        for i in 0..SWEEP_EVERY - 1 {
            cache.record_deny_at(&format!("p:ip-{i}"), start);
        }
        assert_eq!(cache.len(), SWEEP_EVERY - 1);

        let later = start + Duration::from_millis(1001);
        cache.record_deny_at("p:fresh", later);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_denied_at("p:fresh", later));
    }

    #[test]
    fn test_purge_expired_keeps_live_entries() {
        let cache = DenyCache::new(Duration::from_millis(1000));
        let start = Instant::now();
        cache.record_deny_at("p:old", start);
        cache.record_deny_at("p:new", start + Duration::from_millis(500));

        assert_eq!(cache.purge_expired_at(start + Duration::from_millis(1200)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_denied_at("p:new", start + Duration::from_millis(1200)));
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = DenyCache::new(Duration::ZERO);
        cache.record_deny("p:u1");
        assert!(!cache.is_denied("p:u1"));
    }
}
