//! Per-connection prepared statement cache.
//!
//! Maps SQL text to the request handle prepared for it. The cache does not
//! track validity: a reconnect bumps the connection generation and each
//! cached handle notices on its next execute that it must be prepared
//! again.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::registry::StatementId;

/// LRU map from SQL text to statement id.
pub(crate) struct StatementCache {
    entries: LruCache<String, StatementId>,
}

/// Cache key for a SQL text.
pub(crate) fn cache_key(sql: &str) -> &str {
    sql.trim()
}

impl StatementCache {
    /// Create a cache; `None` when `capacity` is zero.
    pub(crate) fn new(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(|cap| Self {
            entries: LruCache::new(cap),
        })
    }

    pub(crate) fn lookup(&mut self, sql: &str) -> Option<StatementId> {
        let hit = self.entries.get(cache_key(sql)).copied();
        if hit.is_some() {
            tracing::trace!(sql = cache_key(sql), "statement cache hit");
        }
        hit
    }

    /// Insert an entry; returns the statement evicted to make room.
    pub(crate) fn insert(&mut self, sql: &str, id: StatementId) -> Option<StatementId> {
        let key = cache_key(sql).to_string();
        match self.entries.push(key.clone(), id) {
            Some((evicted_key, evicted)) if evicted_key != key => Some(evicted),
            _ => None,
        }
    }

    /// Drop the entry pointing at `id`, if any.
    pub(crate) fn forget(&mut self, id: StatementId) {
        let key = self
            .entries
            .iter()
            .find(|(_, cached)| **cached == id)
            .map(|(key, _)| key.clone());
        if let Some(key) = key {
            self.entries.pop(&key);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::{ConnectionHandle, ConnectionSlot};
    use crate::registry::Registry;

    fn statement_ids(n: usize) -> Vec<StatementId> {
        let registry = Registry::default();
        let conn = registry
            .insert_connection(|id| ConnectionSlot::new(ConnectionHandle::new(id, Config::new())));
        (0..n).map(|_| registry.insert_statement(conn)).collect()
    }

    #[test]
    fn test_lookup_ignores_surrounding_whitespace() {
        let ids = statement_ids(1);
        let mut cache = StatementCache::new(4).unwrap();
        assert_eq!(cache.insert("select 1", ids[0]), None);

        assert_eq!(cache.lookup("  select 1\n"), Some(ids[0]));
        assert_eq!(cache.lookup("select 2"), None);
    }

    #[test]
    fn test_eviction_reports_least_recently_used() {
        let ids = statement_ids(3);
        let mut cache = StatementCache::new(2).unwrap();
        cache.insert("a", ids[0]);
        cache.insert("b", ids[1]);
        cache.lookup("a");

        assert_eq!(cache.insert("c", ids[2]), Some(ids[1]));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("b"), None);
    }

    #[test]
    fn test_forget_and_clear() {
        let ids = statement_ids(2);
        let mut cache = StatementCache::new(8).unwrap();
        cache.insert("a", ids[0]);
        cache.insert("b", ids[1]);

        cache.forget(ids[0]);
        assert_eq!(cache.lookup("a"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        assert!(StatementCache::new(0).is_none());
    }
}
