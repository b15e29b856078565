use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blocks::{PromptBlock, PromptCategory};
use crate::common::{CacheStats, VersionedCache};
use crate::repository::{BlockLookup, BlockRepository};
use crate::watch::{ChangeCallback, WatchHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKey {
    All,
    Category(PromptCategory),
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Category(category) => write!(f, "category:{}", category),
        }
    }
}

#[derive(Clone)]
struct Snapshot {
    blocks: Arc<Vec<PromptBlock>>,
    raw_count: usize,
}

/// Result of a cached block query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBlocksResult {
    /// Enabled blocks, sorted by name.
    pub blocks: Vec<PromptBlock>,
    pub loaded_count: usize,
    /// Blocks the repository returned but that were filtered out (disabled).
    pub error_count: usize,
    pub from_cache: bool,
    pub load_time: Duration,
    pub loaded_at: DateTime<Utc>,
}

/// Query-shaped cache over a repository.
///
/// Caches the "all" and per-category queries. By-name lookups pass straight
/// through and rely on the repository's own cache.
pub struct LoadPromptBlocks {
    repository: Arc<dyn BlockRepository>,
    cache: VersionedCache<CacheKey, Snapshot>,
}

impl LoadPromptBlocks {
    pub fn new(repository: Arc<dyn BlockRepository>) -> Self {
        Self {
            repository,
            cache: VersionedCache::default(),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = VersionedCache::new(ttl);
        self
    }

    pub fn repository(&self) -> &Arc<dyn BlockRepository> {
        &self.repository
    }

    /// All enabled blocks.
    pub async fn execute(&self) -> crate::Result<LoadBlocksResult> {
        self.load(CacheKey::All).await
    }

    /// Enabled blocks of one category.
    pub async fn execute_by_category(
        &self,
        category: PromptCategory,
    ) -> crate::Result<LoadBlocksResult> {
        self.load(CacheKey::Category(category)).await
    }

    /// Uncached by-name lookup. Disabled blocks are returned too.
    pub async fn execute_by_name(&self, name: &str) -> BlockLookup {
        self.repository.load_by_name(name).await
    }

    pub async fn get_available_names(&self) -> crate::Result<Vec<String>> {
        self.repository.get_available_names().await
    }

    /// Drop both cache layers. The next query always rescans.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
        self.repository.clear_cache();
        debug!(version = self.cache.version(), "prompt block caches invalidated");
    }

    /// Watch the repository sources; every change invalidates both cache layers.
    pub fn enable_hot_reload(&self) -> crate::Result<WatchHandle> {
        let cache = self.cache.clone();
        let listener: ChangeCallback = Arc::new(move || cache.clear());
        self.repository.watch_with(Some(listener))
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn load(&self, key: CacheKey) -> crate::Result<LoadBlocksResult> {
        let started = Instant::now();
        let repository = Arc::clone(&self.repository);

        let (snapshot, from_cache) = self
            .cache
            .get_or_load(key, move || async move {
                let blocks = match key {
                    CacheKey::All => repository.load_all().await?,
                    CacheKey::Category(category) => repository.load_by_category(category).await?,
                };
                let raw_count = blocks.len();
                let enabled: Vec<PromptBlock> =
                    blocks.into_iter().filter(PromptBlock::is_enabled).collect();
                Ok(Snapshot {
                    blocks: Arc::new(enabled),
                    raw_count,
                })
            })
            .await?;

        let blocks = snapshot.blocks.as_ref().clone();
        debug!(
            key = %key,
            count = blocks.len(),
            from_cache,
            "prompt blocks loaded"
        );

        Ok(LoadBlocksResult {
            loaded_count: blocks.len(),
            error_count: snapshot.raw_count.saturating_sub(blocks.len()),
            blocks,
            from_cache,
            load_time: started.elapsed(),
            loaded_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for LoadPromptBlocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadPromptBlocks")
            .field("cache", &self.cache.stats())
            .finish()
    }
}
