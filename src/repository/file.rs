use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use super::{BlockLookup, BlockRepository, SearchPaths};
use crate::blocks::{BlockParser, PromptBlock, ValidationCode, is_valid_name};
use crate::common::{CacheStats, SourceType, VersionedCache, is_block_file, list_files};
use crate::watch::{ChangeCallback, ChangeNotifier, NotifyWatcher, WatchHandle};

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

#[derive(Clone)]
struct Resolved {
    block: PromptBlock,
    source: SourceType,
    path: PathBuf,
}

/// File system repository over the three ranked block directories.
///
/// Successful by-name lookups are cached for the repository's TTL; the cache
/// is cleared by [`BlockRepository::clear_cache`] and on every watched change.
pub struct FileBlockRepository {
    paths: SearchPaths,
    parser: BlockParser,
    lookups: VersionedCache<String, Resolved>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl FileBlockRepository {
    pub fn new(paths: SearchPaths) -> Self {
        Self {
            paths,
            parser: BlockParser::default(),
            lookups: VersionedCache::default(),
            notifier: Arc::new(NotifyWatcher::new()),
        }
    }

    pub fn with_parser(mut self, parser: BlockParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.lookups = VersionedCache::new(ttl);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn paths(&self) -> &SearchPaths {
        &self.paths
    }

    pub fn parser(&self) -> &BlockParser {
        &self.parser
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lookups.stats()
    }

    /// Load one block file. The file stem must equal the block name, so that
    /// scans and by-name lookups resolve the same set of names.
    async fn load_candidate(&self, path: &Path) -> crate::Result<PromptBlock> {
        let block = self.parser.load_file(path).await?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != block.name() {
            return Err(crate::Error::validation(
                "name",
                format!(
                    "block '{}' must be stored as '{}.yaml', found '{}'",
                    block.name(),
                    block.name(),
                    path.display()
                ),
                ValidationCode::InvalidName,
            ));
        }
        Ok(block)
    }

    /// Parse every block file in one source directory. Files that fail to
    /// read or parse are logged and skipped.
    async fn load_source(&self, source: SourceType, dir: &Path) -> Vec<PromptBlock> {
        let files = match list_files(dir, is_block_file).await {
            Ok(files) => files,
            Err(e) => {
                warn!(source = %source, error = %e, "Failed to list prompt block directory");
                return Vec::new();
            }
        };

        let loads = files.into_iter().map(|path| async move {
            let result = self.load_candidate(&path).await;
            (path, result)
        });

        let mut blocks = Vec::new();
        for (path, result) in join_all(loads).await {
            match result {
                Ok(block) => blocks.push(block),
                Err(e) => warn!(
                    path = %path.display(),
                    source = %source,
                    code = e.code(),
                    "Skipping invalid prompt block: {}",
                    e
                ),
            }
        }

        debug!(source = %source, count = blocks.len(), "Loaded prompt blocks");
        blocks
    }

    async fn resolve(&self, name: &str) -> BlockLookup {
        let mut first_failure: Option<(crate::Error, SourceType, PathBuf)> = None;

        for (source, dir) in self.paths.by_precedence() {
            for ext in EXTENSIONS {
                let path = dir.join(format!("{name}.{ext}"));
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    continue;
                }
                match self.load_candidate(&path).await {
                    Ok(block) => return BlockLookup::found(block, source, Some(path)),
                    Err(e) => {
                        warn!(path = %path.display(), source = %source, "Failed to load prompt block: {}", e);
                        if first_failure.is_none() {
                            first_failure = Some((e, source, path));
                        }
                    }
                }
            }
        }

        match first_failure {
            Some((error, source, path)) => BlockLookup::failed_at(error, source, path),
            None => BlockLookup::not_found(name),
        }
    }
}

impl std::fmt::Debug for FileBlockRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlockRepository")
            .field("paths", &self.paths)
            .field("cached", &self.lookups.len())
            .finish()
    }
}

#[async_trait]
impl BlockRepository for FileBlockRepository {
    async fn load_all(&self) -> crate::Result<Vec<PromptBlock>> {
        let mut merged: HashMap<String, PromptBlock> = HashMap::new();

        for (source, dir) in self.paths.merge_order() {
            for block in self.load_source(source, &dir).await {
                merged.insert(block.name().to_string(), block);
            }
        }

        let mut blocks: Vec<PromptBlock> = merged.into_values().collect();
        blocks.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(blocks)
    }

    async fn load_by_name(&self, name: &str) -> BlockLookup {
        if !is_valid_name(name) {
            return BlockLookup::failed(crate::Error::InvalidName {
                name: name.to_string(),
            });
        }

        let key = name.to_string();
        if let Some(hit) = self.lookups.get(&key) {
            return BlockLookup::found(hit.block, hit.source, Some(hit.path));
        }

        let version = self.lookups.version();
        let lookup = self.resolve(name).await;

        if let (Some(block), Some(source), Some(path)) =
            (&lookup.block, lookup.source, &lookup.file_path)
        {
            self.lookups.insert_if_version(
                key,
                Resolved {
                    block: block.clone(),
                    source,
                    path: path.clone(),
                },
                version,
            );
        }

        lookup
    }

    fn clear_cache(&self) {
        self.lookups.clear();
    }

    fn watch_with(&self, listener: Option<ChangeCallback>) -> crate::Result<WatchHandle> {
        let lookups = self.lookups.clone();
        let on_change: ChangeCallback = Arc::new(move || {
            lookups.clear();
            if let Some(listener) = &listener {
                listener();
            }
        });
        self.notifier.subscribe(&self.paths.dirs(), on_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::ManualNotifier;
    use tempfile::TempDir;

    fn block_yaml(name: &str, category: &str, prompt: &str, priority: u8) -> String {
        format!("name: {name}\ncategory: {category}\nprompt: {prompt}\npriority: {priority}\n")
    }

    async fn write_block(root: &Path, file: &str, content: &str) {
        let dir = root.join("prompts");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(file), content).await.unwrap();
    }

    struct Fixture {
        workspace: TempDir,
        global: TempDir,
        defaults: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                workspace: tempfile::tempdir().unwrap(),
                global: tempfile::tempdir().unwrap(),
                defaults: tempfile::tempdir().unwrap(),
            }
        }

        fn paths(&self) -> SearchPaths {
            SearchPaths::new()
                .workspace(self.workspace.path())
                .global(self.global.path())
                .defaults(self.defaults.path())
        }
    }

    #[tokio::test]
    async fn test_workspace_shadows_defaults() {
        let fx = Fixture::new();
        write_block(
            fx.defaults.path(),
            "data-analysis.yaml",
            &block_yaml("data-analysis", "analysis", "Default text", 50),
        )
        .await;
        write_block(
            fx.workspace.path(),
            "data-analysis.yaml",
            &block_yaml("data-analysis", "analysis", "Workspace text", 50),
        )
        .await;

        let repo = FileBlockRepository::new(fx.paths());
        let all = repo.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].prompt(), "Workspace text");

        let lookup = repo.load_by_name("data-analysis").await;
        assert!(lookup.success);
        assert_eq!(lookup.source, Some(SourceType::Workspace));
        assert_eq!(lookup.block.unwrap().prompt(), "Workspace text");
    }

    #[tokio::test]
    async fn test_load_all_skips_malformed_file() {
        let fx = Fixture::new();
        for name in ["a", "b", "c", "d"] {
            write_block(
                fx.workspace.path(),
                &format!("{name}.yaml"),
                &block_yaml(name, "analysis", "Do it", 50),
            )
            .await;
        }
        write_block(fx.workspace.path(), "broken.yaml", "name: [unclosed\n").await;
        write_block(fx.workspace.path(), "notes.txt", "ignored").await;

        let repo = FileBlockRepository::new(fx.paths());
        let names: Vec<String> = repo
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_load_by_name_rejects_traversal() {
        let fx = Fixture::new();
        let repo = FileBlockRepository::new(fx.paths());

        for name in ["../etc/passwd", "a/b", "", "with space"] {
            let lookup = repo.load_by_name(name).await;
            assert!(!lookup.success);
            assert!(lookup.source.is_none());
            assert_eq!(lookup.error.unwrap().code(), "INVALID_NAME");
        }
    }

    #[tokio::test]
    async fn test_load_by_name_not_found() {
        let fx = Fixture::new();
        let repo = FileBlockRepository::new(fx.paths());

        let lookup = repo.load_by_name("missing").await;
        assert!(!lookup.success);
        assert!(lookup.file_path.is_none());
        assert_eq!(lookup.error.unwrap().code(), "NOT_FOUND");
        assert!(!repo.exists("missing").await);
    }

    #[tokio::test]
    async fn test_load_by_name_yml_and_fallthrough() {
        let fx = Fixture::new();
        write_block(fx.workspace.path(), "charts.yaml", "name: [broken\n").await;
        write_block(
            fx.global.path(),
            "charts.yml",
            &block_yaml("charts", "visualization", "Plot it", 60),
        )
        .await;

        let repo = FileBlockRepository::new(fx.paths());
        let lookup = repo.load_by_name("charts").await;
        assert!(lookup.success);
        assert_eq!(lookup.source, Some(SourceType::Global));
        assert!(lookup.file_path.unwrap().ends_with("prompts/charts.yml"));
    }

    #[tokio::test]
    async fn test_load_by_name_reports_failing_source() {
        let fx = Fixture::new();
        write_block(fx.workspace.path(), "bad.yaml", "name: bad\ncategory: nope\nprompt: x\n").await;

        let repo = FileBlockRepository::new(fx.paths());
        let lookup = repo.load_by_name("bad").await;
        assert!(!lookup.success);
        assert_eq!(lookup.source, Some(SourceType::Workspace));
        assert!(lookup.error.unwrap().is_validation_error());
    }

    #[tokio::test]
    async fn test_name_must_match_file_stem() {
        let fx = Fixture::new();
        write_block(
            fx.workspace.path(),
            "a.yaml",
            &block_yaml("b", "analysis", "Misfiled", 50),
        )
        .await;
        write_block(
            fx.workspace.path(),
            "c.yaml",
            &block_yaml("c", "analysis", "Filed", 50),
        )
        .await;

        let repo = FileBlockRepository::new(fx.paths());
        let names = repo.get_available_names().await.unwrap();
        assert_eq!(names, vec!["c"]);
        for name in &names {
            assert!(repo.exists(name).await);
        }
        assert!(!repo.exists("a").await);
        assert!(!repo.exists("b").await);

        let lookup = repo.load_by_name("a").await;
        assert_eq!(lookup.source, Some(SourceType::Workspace));
        let err = lookup.error.unwrap();
        assert_eq!(err.field(), Some("name"));
        assert_eq!(repo.cache_stats().entries, 1);
    }

    #[tokio::test]
    async fn test_lookup_cache_and_clear() {
        let fx = Fixture::new();
        write_block(
            fx.workspace.path(),
            "cached.yaml",
            &block_yaml("cached", "methodology", "First", 50),
        )
        .await;

        let repo = FileBlockRepository::new(fx.paths());
        assert_eq!(repo.load_by_name("cached").await.block.unwrap().prompt(), "First");

        write_block(
            fx.workspace.path(),
            "cached.yaml",
            &block_yaml("cached", "methodology", "Second", 50),
        )
        .await;
        assert_eq!(repo.load_by_name("cached").await.block.unwrap().prompt(), "First");

        repo.clear_cache();
        assert_eq!(repo.load_by_name("cached").await.block.unwrap().prompt(), "Second");
    }

    #[tokio::test]
    async fn test_watch_clears_cache_then_notifies() {
        let fx = Fixture::new();
        write_block(
            fx.workspace.path(),
            "w.yaml",
            &block_yaml("w", "reporting", "Old", 50),
        )
        .await;

        let notifier = ManualNotifier::new();
        let repo = FileBlockRepository::new(fx.paths()).with_notifier(Arc::new(notifier.clone()));
        repo.load_by_name("w").await;
        assert_eq!(repo.cache_stats().entries, 1);

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = repo
            .watch_with(Some(Arc::new(move || {
                flag.store(true, std::sync::atomic::Ordering::SeqCst)
            })))
            .unwrap();

        notifier.notify_change();
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(repo.cache_stats().entries, 0);

        handle.dispose();
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_directories_are_empty() {
        let repo = FileBlockRepository::new(
            SearchPaths::new().workspace("/nonexistent/prompt-blocks/ws"),
        );
        assert!(repo.load_all().await.unwrap().is_empty());
        assert!(repo.get_available_names().await.unwrap().is_empty());
    }
}
