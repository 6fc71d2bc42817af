// ABOUTME: In-memory cache implementation with LRU eviction and TTL support
// ABOUTME: Includes an optional background sweep for expired entries
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::{CacheConfig, CacheProvider};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

type Store<V> = Arc<RwLock<LruCache<String, CacheEntry<V>>>>;

/// In-memory cache with LRU eviction and optional background cleanup
///
/// The store sits behind `Arc<RwLock<_>>` because the sweep task shares it.
pub struct InMemoryCache<V> {
    store: Store<V>,
    default_ttl: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl<V> InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
        Some(n) => n,
        None => unreachable!(),
    };

    /// Create a cache; spawns the sweep task when `cleanup_interval` is set
    ///
    /// Must be called inside a tokio runtime when the sweep is enabled.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(Self::DEFAULT_CAPACITY);
        let store: Store<V> = Arc::new(RwLock::new(LruCache::new(capacity)));

        let shutdown_tx = config.cleanup_interval.map(|cleanup_interval| {
            let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
            let sweep_store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => Self::cleanup_expired(&sweep_store).await,
                        _ = shutdown_rx.recv() => {
                            tracing::debug!("Cache cleanup task received shutdown signal");
                            break;
                        }
                    }
                }
            });
            shutdown_tx
        });

        Self {
            store,
            default_ttl: config.default_ttl,
            shutdown_tx,
        }
    }

    async fn cleanup_expired(store: &Store<V>) {
        let mut guard = store.write().await;
        let expired: Vec<String> = guard
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            guard.pop(key);
        }
        drop(guard);
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "Cleaned up expired cache entries");
        }
    }

    /// Number of stored entries, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

#[async_trait]
impl<V> CacheProvider<V> for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        // LruCache::get updates recency, so it needs the write lock
        let mut store = self.store.write().await;
        let hit = store.get(key).map(|entry| (entry.is_expired(), entry.value.clone()));
        match hit {
            Some((false, value)) => Some(value),
            Some((true, _)) => {
                store.pop(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: V) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        self.store
            .write()
            .await
            .push(key.to_owned(), CacheEntry::new(value, ttl));
    }

    async fn invalidate(&self, key: &str) {
        self.store.write().await.pop(key);
    }

    async fn clear(&self) {
        self.store.write().await.clear();
    }
}

impl<V> Drop for InMemoryCache<V> {
    fn drop(&mut self) {
        if let Some(tx) = &self.shutdown_tx {
            if let Err(e) = tx.try_send(()) {
                tracing::debug!(error = ?e, "Cache shutdown signal send failed (channel likely closed)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_entries: usize, ttl: Duration) -> CacheConfig {
        CacheConfig {
            max_entries,
            default_ttl: ttl,
            cleanup_interval: None,
        }
    }

    #[tokio::test]
    async fn test_get_returns_live_entry() {
        let cache = InMemoryCache::new(&config(10, Duration::from_secs(60)));
        cache.set("client:a", 7_u32).await;
        assert_eq!(cache.get("client:a").await, Some(7));
        cache.invalidate("client:a").await;
        assert_eq!(cache.get("client:a").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = InMemoryCache::new(&config(10, Duration::from_secs(60)));
        cache
            .set_with_ttl("client:a", 1_u32, Duration::from_millis(0))
            .await;
        assert_eq!(cache.get("client:a").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let cache = InMemoryCache::new(&config(2, Duration::from_secs(60)));
        cache.set("a", 1_u32).await;
        cache.set("b", 2_u32).await;
        assert_eq!(cache.get("a").await, Some(1));
        cache.set("c", 3_u32).await;
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_background_sweep_removes_expired() {
        let cache = InMemoryCache::new(&CacheConfig {
            max_entries: 10,
            default_ttl: Duration::from_millis(5),
            cleanup_interval: Some(Duration::from_millis(10)),
        });
        cache.set("a", 1_u32).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.is_empty().await);
    }
}
