use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rampart_core::{Bean, BeanContext, BeanError, Dependency};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::store::{CacheStore, InMemoryStore};

/// Best-effort JSON cache in front of a [`CacheStore`].
///
/// The cache is an optimisation only: every failure degrades to a miss and
/// is logged, never returned. Readers must be correct with an empty cache.
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Layer over a fresh [`InMemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Derive `{prefix}.{sha256-hex}` from the JSON form of `query`.
    ///
    /// `serde_json` maps are ordered, so structurally equal queries hash to
    /// the same key.
    pub fn key<Q: Serialize + ?Sized>(prefix: &str, query: &Q) -> String {
        let bytes = serde_json::to_vec(query).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        format!("{prefix}.{}", hex::encode(digest))
    }

    /// Cached value for `key`. Absent, expired and malformed entries are all `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.store.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                tracing::trace!(key, "cache hit");
                Some(value)
            }
            Err(err) => {
                tracing::debug!(key, error = %err, "ignoring malformed cache payload");
                None
            }
        }
    }

    /// Store `value` for `ttl_secs` seconds. A zero TTL disables the write.
    pub async fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) {
        if ttl_secs == 0 {
            return;
        }
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => {
                tracing::warn!(key, error = %err, "cache payload not serializable");
                return;
            }
        };
        if let Err(err) = self
            .store
            .set(key, payload, Duration::from_secs(ttl_secs))
            .await
        {
            tracing::warn!(key, error = %err, "cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.store.remove(key).await {
            tracing::warn!(key, error = %err, "cache delete failed");
        }
    }

    pub async fn delete_prefix(&self, prefix: &str) {
        self.store.remove_by_prefix(prefix).await;
    }
}

impl Bean for CacheLayer {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Arc<dyn CacheStore>>()]
    }

    fn build(ctx: &BeanContext) -> Result<Self, BeanError> {
        Ok(Self::new(ctx.get::<Arc<dyn CacheStore>>()?))
    }
}
