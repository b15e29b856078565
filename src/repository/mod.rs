//! Block repositories.
//!
//! A repository resolves blocks across the ranked sources:
//! - Workspace (`<workspace>/prompts/`), highest precedence
//! - Global (`~/.prompt-blocks/prompts/`)
//! - Defaults (shipped with the host), lowest precedence
//!
//! A higher source shadows a lower one by block name, never by content.

mod file;
mod memory;
mod paths;

use std::path::PathBuf;

use async_trait::async_trait;

pub use file::FileBlockRepository;
pub use memory::InMemoryBlockRepository;
pub use paths::{PROMPTS_SUBDIR, SearchPaths};

use crate::blocks::{PromptBlock, PromptCategory};
use crate::common::SourceType;
use crate::watch::{ChangeCallback, WatchHandle};

/// Outcome of a by-name lookup.
///
/// `source` and `file_path` describe where the block, or the failure, came
/// from. Both are `None` when no source was consulted.
#[derive(Debug)]
pub struct BlockLookup {
    pub success: bool,
    pub block: Option<PromptBlock>,
    pub error: Option<crate::Error>,
    pub source: Option<SourceType>,
    pub file_path: Option<PathBuf>,
}

impl BlockLookup {
    pub fn found(block: PromptBlock, source: SourceType, file_path: Option<PathBuf>) -> Self {
        Self {
            success: true,
            block: Some(block),
            error: None,
            source: Some(source),
            file_path,
        }
    }

    pub fn failed(error: crate::Error) -> Self {
        Self {
            success: false,
            block: None,
            error: Some(error),
            source: None,
            file_path: None,
        }
    }

    pub fn failed_at(error: crate::Error, source: SourceType, file_path: PathBuf) -> Self {
        Self {
            source: Some(source),
            file_path: Some(file_path),
            ..Self::failed(error)
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self::failed(crate::Error::NotFound {
            name: name.to_string(),
        })
    }

    pub fn into_result(self) -> crate::Result<PromptBlock> {
        match (self.block, self.error) {
            (Some(block), _) => Ok(block),
            (None, Some(error)) => Err(error),
            (None, None) => Err(crate::Error::Task("lookup produced no block".into())),
        }
    }
}

/// Source of prompt blocks.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Every block across all sources, merged by name (higher source wins),
    /// sorted by name. Disabled blocks are included.
    async fn load_all(&self) -> crate::Result<Vec<PromptBlock>>;

    /// Resolve one block by name, first successful source in precedence order.
    async fn load_by_name(&self, name: &str) -> BlockLookup;

    async fn load_by_category(&self, category: PromptCategory) -> crate::Result<Vec<PromptBlock>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|block| block.category() == category)
            .collect())
    }

    async fn exists(&self, name: &str) -> bool {
        self.load_by_name(name).await.success
    }

    /// Sorted, de-duplicated block names, disabled blocks included.
    async fn get_available_names(&self) -> crate::Result<Vec<String>> {
        let mut names: Vec<String> = self
            .load_all()
            .await?
            .into_iter()
            .map(|block| block.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Drop any internal lookup cache.
    fn clear_cache(&self);

    /// Start watching the sources. Each change clears the internal cache and
    /// then runs `listener`, if any.
    fn watch_with(&self, listener: Option<ChangeCallback>) -> crate::Result<WatchHandle>;

    fn watch_for_changes(&self) -> crate::Result<WatchHandle> {
        self.watch_with(None)
    }
}
