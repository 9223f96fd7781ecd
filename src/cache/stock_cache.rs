use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cached quantity/version pair for one product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedStock {
    pub quantity: i64,
    pub version: i64,
}

/// Key→{quantity, version} store read by catalog queries. Implementations
/// must make `set_if_newer` atomic per key; the monotonic-version rule is the
/// cache's entire concurrency control.
#[async_trait]
pub trait StockCache: Send + Sync {
    async fn get(&self, product_id: Uuid) -> Option<CachedStock>;

    /// Apply the entry only if `version` is strictly greater than the held
    /// version (or the key is absent). Returns whether it was applied.
    async fn set_if_newer(&self, product_id: Uuid, quantity: i64, version: i64) -> bool;

    /// Number of cached products (diagnostics)
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// In-process cache over a concurrent map. The entry guard holds the shard
/// lock for the key, making the version check and the write one atomic step.
#[derive(Debug, Default)]
pub struct InMemoryStockCache {
    entries: DashMap<Uuid, CachedStock>,
}

impl InMemoryStockCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockCache for InMemoryStockCache {
    async fn get(&self, product_id: Uuid) -> Option<CachedStock> {
        self.entries.get(&product_id).map(|entry| *entry.value())
    }

    async fn set_if_newer(&self, product_id: Uuid, quantity: i64, version: i64) -> bool {
        match self.entries.entry(product_id) {
            Entry::Occupied(mut occupied) => {
                if version > occupied.get().version {
                    occupied.insert(CachedStock { quantity, version });
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedStock { quantity, version });
                true
            }
        }
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}
