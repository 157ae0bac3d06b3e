use super::{HoldersError, HoldersList};
use alloy_primitives::Address;
use async_trait::async_trait;
use mini_moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const MAX_CACHED_TOKENS: u64 = 10_000;

/// Read-through TTL cache in front of another [`HoldersList`].
///
/// Only hits are cached. A miss stays a miss until the indexer fills the
/// store, so it is asked again on the next lookup.
pub struct CachedHoldersList {
    inner: Arc<dyn HoldersList>,
    cache: Cache<Address, Arc<Vec<Address>>>,
}

impl CachedHoldersList {
    pub fn new(inner: Arc<dyn HoldersList>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_TOKENS)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }
}

#[async_trait]
impl HoldersList for CachedHoldersList {
    async fn get(&self, token: Address) -> Result<Vec<Address>, HoldersError> {
        if let Some(holders) = self.cache.get(&token) {
            return Ok(holders.as_ref().clone());
        }

        let holders = self.inner.get(token).await?;
        debug!(token = %token, holders = holders.len(), "cached holders list");
        self.cache.insert(token, Arc::new(holders.clone()));
        Ok(holders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        calls: AtomicUsize,
        holders: Option<Vec<Address>>,
    }

    #[async_trait]
    impl HoldersList for CountingStore {
        async fn get(&self, token: Address) -> Result<Vec<Address>, HoldersError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.holders.clone().ok_or(HoldersError::NotFound(token))
        }
    }

    const TOKEN: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

    #[tokio::test]
    async fn hits_are_served_from_memory() {
        let store = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
            holders: Some(vec![address!("5041ed759Dd4aFc3a72b8192C143F72f4724081A")]),
        });
        let cached = CachedHoldersList::new(store.clone(), Duration::from_secs(60));

        assert_eq!(cached.get(TOKEN).await.unwrap().len(), 1);
        assert_eq!(cached.get(TOKEN).await.unwrap().len(), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let store = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
            holders: None,
        });
        let cached = CachedHoldersList::new(store.clone(), Duration::from_secs(60));

        assert!(matches!(
            cached.get(TOKEN).await,
            Err(HoldersError::NotFound(t)) if t == TOKEN
        ));
        assert!(cached.get(TOKEN).await.is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }
}
