// ABOUTME: Cache abstraction with TTL and bounded capacity for client view lookups
// ABOUTME: Backends are injected as trait objects so the registry never owns a static map
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

/// In-memory LRU cache with per-entry expiry
pub mod memory;

use async_trait::async_trait;
use greenbutton_core::constants::cache::{
    DEFAULT_CLIENT_CACHE_MAX_ENTRIES, DEFAULT_CLIENT_CACHE_TTL_SECS,
};
use std::marker::PhantomData;
use std::time::Duration;

/// Cache provider for values of type `V`
///
/// Lookups never fail; a backend problem is a miss.
#[async_trait]
pub trait CacheProvider<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Fetch a live entry
    async fn get(&self, key: &str) -> Option<V>;

    /// Store an entry with the backend's default TTL
    async fn set(&self, key: &str, value: V);

    /// Store an entry with an explicit TTL
    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration);

    /// Remove one entry
    async fn invalidate(&self, key: &str);

    /// Remove every entry
    async fn clear(&self);
}

/// Cache sizing and expiry
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries kept before least-recently-used eviction
    pub max_entries: usize,
    /// TTL applied by [`CacheProvider::set`]
    pub default_ttl: Duration,
    /// Interval of the background sweep; `None` disables it
    pub cleanup_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CLIENT_CACHE_MAX_ENTRIES,
            default_ttl: Duration::from_secs(DEFAULT_CLIENT_CACHE_TTL_SECS),
            cleanup_interval: None,
        }
    }
}

/// Cache that stores nothing
pub struct NullCache<V>(PhantomData<fn() -> V>);

impl<V> NullCache<V> {
    /// Create a disabled cache
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V> Default for NullCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheProvider<V> for NullCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> Option<V> {
        None
    }

    async fn set(&self, _key: &str, _value: V) {}

    async fn set_with_ttl(&self, _key: &str, _value: V, _ttl: Duration) {}

    async fn invalidate(&self, _key: &str) {}

    async fn clear(&self) {}
}

/// Key under which a client view is cached
#[must_use]
pub fn client_view_key(client_id: &str) -> String {
    format!("client:{client_id}")
}
