use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::{BlockLookup, BlockRepository};
use crate::blocks::{PromptBlock, is_valid_name};
use crate::common::SourceType;
use crate::watch::{ChangeCallback, ChangeNotifier, ManualNotifier, WatchHandle};

type Layers = HashMap<SourceType, BTreeMap<String, PromptBlock>>;

/// In-memory repository for programmatic registration and tests.
///
/// Blocks are layered per source with the same precedence rules as the file
/// repository. Mutations notify active watchers.
#[derive(Clone, Default)]
pub struct InMemoryBlockRepository {
    layers: Arc<RwLock<Layers>>,
    notifier: ManualNotifier,
    load_all_calls: Arc<AtomicUsize>,
}

impl InMemoryBlockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(self, source: SourceType, block: PromptBlock) -> Self {
        self.write(|layers| {
            layers
                .entry(source)
                .or_default()
                .insert(block.name().to_string(), block);
        });
        self
    }

    pub fn with_blocks(self, source: SourceType, blocks: impl IntoIterator<Item = PromptBlock>) -> Self {
        blocks
            .into_iter()
            .fold(self, |repo, block| repo.with_block(source, block))
    }

    pub fn insert(&self, source: SourceType, block: PromptBlock) {
        self.write(|layers| {
            layers
                .entry(source)
                .or_default()
                .insert(block.name().to_string(), block);
        });
        self.notifier.notify_change();
    }

    pub fn remove(&self, source: SourceType, name: &str) -> Option<PromptBlock> {
        let removed = self.write(|layers| layers.get_mut(&source).and_then(|l| l.remove(name)));
        if removed.is_some() {
            self.notifier.notify_change();
        }
        removed
    }

    /// Number of [`BlockRepository::load_all`] calls served so far.
    pub fn load_all_calls(&self) -> usize {
        self.load_all_calls.load(Ordering::SeqCst)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Layers) -> R) -> R {
        f(&mut self.layers.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn read<R>(&self, f: impl FnOnce(&Layers) -> R) -> R {
        f(&self.layers.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl std::fmt::Debug for InMemoryBlockRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count: usize = self.read(|layers| layers.values().map(BTreeMap::len).sum());
        f.debug_struct("InMemoryBlockRepository")
            .field("blocks", &count)
            .finish()
    }
}

#[async_trait]
impl BlockRepository for InMemoryBlockRepository {
    async fn load_all(&self) -> crate::Result<Vec<PromptBlock>> {
        self.load_all_calls.fetch_add(1, Ordering::SeqCst);

        let merged = self.read(|layers| {
            let mut merged: BTreeMap<String, PromptBlock> = BTreeMap::new();
            for source in SourceType::MERGE_ORDER {
                if let Some(layer) = layers.get(&source) {
                    merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            merged
        });

        Ok(merged.into_values().collect())
    }

    async fn load_by_name(&self, name: &str) -> BlockLookup {
        if !is_valid_name(name) {
            return BlockLookup::failed(crate::Error::InvalidName {
                name: name.to_string(),
            });
        }

        self.read(|layers| {
            SourceType::BY_PRECEDENCE
                .into_iter()
                .find_map(|source| {
                    layers
                        .get(&source)
                        .and_then(|layer| layer.get(name))
                        .map(|block| BlockLookup::found(block.clone(), source, None))
                })
                .unwrap_or_else(|| BlockLookup::not_found(name))
        })
    }

    fn clear_cache(&self) {}

    fn watch_with(&self, listener: Option<ChangeCallback>) -> crate::Result<WatchHandle> {
        let on_change: ChangeCallback = listener.unwrap_or_else(|| Arc::new(|| {}));
        self.notifier.subscribe(&[], on_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{PromptBlockData, PromptCategory};

    fn block(name: &str, prompt: &str) -> PromptBlock {
        PromptBlock::create(PromptBlockData::new(name, PromptCategory::Analysis, prompt)).unwrap()
    }

    #[tokio::test]
    async fn test_precedence() {
        let repo = InMemoryBlockRepository::new()
            .with_block(SourceType::Defaults, block("shared", "defaults"))
            .with_block(SourceType::Global, block("shared", "global"))
            .with_block(SourceType::Defaults, block("only-default", "d"));

        let all = repo.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name(), "only-default");
        assert_eq!(all[1].prompt(), "global");

        let lookup = repo.load_by_name("shared").await;
        assert_eq!(lookup.source, Some(SourceType::Global));
    }

    #[tokio::test]
    async fn test_mutations_notify_watchers() {
        let repo = InMemoryBlockRepository::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let handle = repo
            .watch_with(Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();

        repo.insert(SourceType::Workspace, block("a", "x"));
        assert!(repo.remove(SourceType::Workspace, "a").is_some());
        assert!(repo.remove(SourceType::Workspace, "a").is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        drop(handle);
        repo.insert(SourceType::Workspace, block("b", "y"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_name() {
        let repo = InMemoryBlockRepository::new();
        let lookup = repo.load_by_name("../x").await;
        assert_eq!(lookup.error.unwrap().code(), "INVALID_NAME");
    }
}
