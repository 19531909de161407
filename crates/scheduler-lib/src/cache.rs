//! Cluster connection cache
//!
//! Holds the API endpoint and certificate authority of every cluster that
//! passed the schedule tag gate. Entries are derived from immutable cluster
//! metadata, so they are never invalidated for the lifetime of the process.

use crate::models::ClusterConnection;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Concurrent map of cluster name -> connection details
#[derive(Debug, Default)]
pub struct ConnectionCache {
    connections: DashMap<String, ClusterConnection>,
    /// Maximum number of clusters held; `None` means unbounded
    capacity: Option<usize>,
    /// Slots taken so far; entries are never removed
    reserved: AtomicUsize,
}

impl ConnectionCache {
    /// Create an unbounded cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that stops accepting new clusters once `capacity` is reached
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            connections: DashMap::new(),
            capacity,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Look up a cluster's connection
    pub fn get(&self, cluster: &str) -> Option<ClusterConnection> {
        self.connections.get(cluster).map(|r| r.clone())
    }

    /// Store a cluster's connection. Returns false when the cache is full.
    ///
    /// Re-inserting a known cluster always succeeds (last writer wins).
    pub fn put(&self, cluster: impl Into<String>, connection: ClusterConnection) -> bool {
        match self.connections.entry(cluster.into()) {
            Entry::Occupied(mut entry) => {
                entry.insert(connection);
                true
            }
            Entry::Vacant(entry) => {
                if !self.reserve_slot() {
                    warn!(
                        cluster = %entry.key(),
                        capacity = ?self.capacity,
                        "Connection cache full, not caching cluster"
                    );
                    return false;
                }
                debug!(
                    cluster = %entry.key(),
                    endpoint = %connection.endpoint,
                    "Caching cluster connection"
                );
                entry.insert(connection);
                true
            }
        }
    }

    // Slots are claimed atomically so concurrent writers never overshoot
    fn reserve_slot(&self) -> bool {
        match self.capacity {
            None => true,
            Some(capacity) => self
                .reserved
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                    (taken < capacity).then_some(taken + 1)
                })
                .is_ok(),
        }
    }

    pub fn contains(&self, cluster: &str) -> bool {
        self.connections.contains_key(cluster)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(cluster: &str) -> ClusterConnection {
        ClusterConnection {
            cluster: cluster.to_string(),
            endpoint: format!("https://{}.eks.example.com", cluster),
            certificate_authority: "Y2EtZGF0YQ==".to_string(),
        }
    }

    #[test]
    fn test_get_and_put() {
        let cache = ConnectionCache::new();
        assert!(cache.get("c1").is_none());

        assert!(cache.put("c1", connection("c1")));
        assert_eq!(cache.get("c1"), Some(connection("c1")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_is_idempotent() {
        let cache = ConnectionCache::new();
        cache.put("c1", connection("c1"));
        cache.put("c1", connection("c1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_bound_rejects_new_clusters() {
        let cache = ConnectionCache::with_capacity(Some(1));
        assert!(cache.put("c1", connection("c1")));
        assert!(!cache.put("c2", connection("c2")));
        assert!(!cache.contains("c2"));

        // Known clusters can still be refreshed
        assert!(cache.put("c1", connection("c1")));
    }

    #[test]
    fn test_concurrent_inserts() {
        let cache = std::sync::Arc::new(ConnectionCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let name = format!("c{}", i % 4);
                    cache.put(name.clone(), connection(&name));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_capacity_holds_under_concurrent_inserts() {
        let cache = std::sync::Arc::new(ConnectionCache::with_capacity(Some(3)));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let name = format!("c{}", i);
                    cache.put(name.clone(), connection(&name))
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|accepted| *accepted)
            .count();
        assert_eq!(accepted, 3);
        assert_eq!(cache.len(), 3);
    }
}
