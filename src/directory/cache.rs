// Directory Lookup Cache
//
// Node-local cache of leader lookup results. Entries expire after the
// configured TTL and are dropped eagerly when a CacheInvalidate arrives or
// a directory change is applied locally. Invalidation is idempotent.

use crate::types::NodeId;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    nodes: Vec<NodeId>,
    cached_at: Instant,
}

#[derive(Debug)]
pub struct DirectoryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl DirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached nodes for a term; expired entries are removed on access.
    pub fn get(&self, term: &str) -> Option<Vec<NodeId>> {
        let fresh = match self.entries.get(term) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.nodes.clone()),
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            self.entries.remove(term);
        }
        fresh
    }

    pub fn put(&self, term: String, nodes: Vec<NodeId>) {
        self.entries.insert(
            term,
            CacheEntry {
                nodes,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, term: &str) {
        self.entries.remove(term);
    }

    pub fn invalidate_many<'a>(&self, terms: impl IntoIterator<Item = &'a String>) {
        for term in terms {
            self.entries.remove(term);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
