//! Memoised enforcement decisions.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Decision store consulted by [`CachedEnforcer`](crate::enforcer::CachedEnforcer)
/// before evaluating a request.
pub trait Cache: Send + Sync {
    /// Store `value`; `ttl` of `None` keeps it until deleted or cleared.
    fn set(&self, key: &str, value: bool, ttl: Option<Duration>);

    /// `None` when the key is absent or expired.
    fn get(&self, key: &str) -> Option<bool>;

    fn delete(&self, key: &str);

    fn clear(&self);
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: bool,
    expires_at: Option<Instant>,
}

/// In-memory map with per-entry expiry. Expired entries are dropped lazily
/// on lookup.
#[derive(Debug, Default)]
pub struct DefaultCache {
    entries: DashMap<String, Entry>,
}

impl DefaultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Cache for DefaultCache {
    fn set(&self, key: &str, value: bool, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn get(&self, key: &str) -> Option<bool> {
        let entry = *self.entries.get(key)?;
        match entry.expires_at {
            Some(at) if Instant::now() >= at => {
                self.entries.remove(key);
                None
            }
            _ => Some(entry.value),
        }
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let cache = DefaultCache::new();
        assert_eq!(cache.get("alice$$data1$$read"), None);

        cache.set("alice$$data1$$read", true, None);
        cache.set("bob$$data1$$read", false, None);
        assert_eq!(cache.get("alice$$data1$$read"), Some(true));
        assert_eq!(cache.get("bob$$data1$$read"), Some(false));

        cache.delete("alice$$data1$$read");
        assert_eq!(cache.get("alice$$data1$$read"), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_expires() {
        let cache = DefaultCache::new();
        cache.set("k", true, Some(Duration::from_millis(20)));
        assert_eq!(cache.get("k"), Some(true));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }
}
