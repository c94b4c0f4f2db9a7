use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::config::AppConfig;

/// Process-local record of gateway references known to be settled.
///
/// Only a hint: a miss falls through to the ledger, so an evicted or
/// invalidated entry never changes an outcome.
#[async_trait]
pub trait ReferenceCache: Send + Sync {
    async fn contains(&self, reference: &str) -> bool;

    async fn insert(&self, reference: &str);

    async fn invalidate(&self, reference: &str);
}

#[derive(Clone)]
pub struct SettledReferenceCache {
    inner: Cache<String, ()>,
}

impl SettledReferenceCache {
    pub fn new(ttl_seconds: u64, max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries.max(1))
                .time_to_live(Duration::from_secs(ttl_seconds.max(1)))
                .build(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.settled_reference_cache_ttl_seconds,
            config.settled_reference_cache_max_entries,
        )
    }
}

#[async_trait]
impl ReferenceCache for SettledReferenceCache {
    async fn contains(&self, reference: &str) -> bool {
        self.inner.get(reference).await.is_some()
    }

    async fn insert(&self, reference: &str) {
        self.inner.insert(reference.to_string(), ()).await;
    }

    async fn invalidate(&self, reference: &str) {
        self.inner.invalidate(reference).await;
    }
}
