use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use rampart_core::BoxFuture;

/// Failure reported by a [`CacheStore`] write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The store could not be reached.
    Unavailable(String),
    /// The store rejected the operation.
    Rejected(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Unavailable(msg) => write!(f, "cache unavailable: {msg}"),
            CacheError::Rejected(msg) => write!(f, "cache rejected operation: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Pluggable cache backend.
///
/// Implement this to swap the in-memory store for Redis, Memcached, etc.
/// Reads never fail: an unreachable store is a miss.
pub trait CacheStore: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Bytes>>;
    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> BoxFuture<'a, Result<(), CacheError>>;
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;
    fn clear(&self) -> BoxFuture<'_, ()>;
    fn remove_by_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, ()>;
}

/// Default in-memory cache store backed by `DashMap`.
///
/// Each entry stores `(value, inserted_at, ttl)` and is lazily evicted on access.
/// Keys are also kept in an ordered index, so [`CacheStore::remove_by_prefix`]
/// walks only the matching range instead of every entry.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<DashMap<String, (Bytes, Instant, Duration)>>,
    keys: Arc<Mutex<BTreeSet<String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) {
        let mut keys = self.keys();
        self.inner.retain(|key, (_, inserted, ttl)| {
            let live = inserted.elapsed() < *ttl;
            if !live {
                keys.remove(key);
            }
            live
        });
    }

    fn keys(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheStore for InMemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            if let Some(entry) = self.inner.get(key) {
                let (val, inserted, ttl) = entry.value();
                if inserted.elapsed() < *ttl {
                    return Some(val.clone());
                }
                // Drop the read guard before removing.
                drop(entry);
                let expired = self
                    .inner
                    .remove_if(key, |_, (_, inserted, ttl)| inserted.elapsed() >= *ttl);
                if expired.is_some() {
                    self.keys().remove(key);
                }
            }
            None
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.inner.insert(key.to_string(), (value, Instant::now(), ttl));
            self.keys().insert(key.to_string());
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.keys().remove(key);
            self.inner.remove(key);
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut keys = self.keys();
            keys.clear();
            self.inner.clear();
        })
    }

    fn remove_by_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let matched: Vec<String> = {
                let mut keys = self.keys();
                let matched: Vec<String> = keys
                    .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                    .take_while(|k| k.starts_with(prefix))
                    .cloned()
                    .collect();
                for key in &matched {
                    keys.remove(key);
                }
                matched
            };
            for key in &matched {
                self.inner.remove(key);
            }
        })
    }
}
