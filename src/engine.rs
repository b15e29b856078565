//! Composition root: configuration, builder and the assembled engine.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::blocks::{BlockParser, DEFAULT_MAX_PROMPT_LENGTH, ValidationOptions};
use crate::common::{SourceType, home_dir};
use crate::repository::{BlockRepository, FileBlockRepository, PROMPTS_SUBDIR, SearchPaths};
use crate::usecases::{ActivePromptConfig, EnhanceSystemPrompt, LoadPromptBlocks};
use crate::watch::{ChangeNotifier, NotifyWatcher};

pub const ENV_CACHE_TTL: &str = "PROMPT_BLOCKS_CACHE_TTL_SECS";
pub const ENV_REPOSITORY_CACHE_TTL: &str = "PROMPT_BLOCKS_REPOSITORY_CACHE_TTL_SECS";
pub const ENV_MAX_PROMPT_LENGTH: &str = "PROMPT_BLOCKS_MAX_PROMPT_LENGTH";
pub const ENV_STRICT: &str = "PROMPT_BLOCKS_STRICT";

/// Directory under the user's home holding global blocks.
pub const USER_GLOBAL_DIR: &str = ".prompt-blocks";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// TTL of the "all" and per-category query cache.
    pub cache_ttl_secs: u64,
    /// TTL of the repository's by-name lookup cache.
    pub repository_cache_ttl_secs: u64,
    /// Prompt length (characters) above which validation warns.
    pub prompt_length_warning: usize,
    pub strict: bool,
    pub prompts_subdir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            repository_cache_ttl_secs: 300,
            prompt_length_warning: DEFAULT_MAX_PROMPT_LENGTH,
            strict: false,
            prompts_subdir: PROMPTS_SUBDIR.to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `PROMPT_BLOCKS_*` environment variables.
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by environment variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> crate::Result<Self> {
        let mut config = Self::default();

        if let Some(value) = parse_var(&lookup, ENV_CACHE_TTL)? {
            config.cache_ttl_secs = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_REPOSITORY_CACHE_TTL)? {
            config.repository_cache_ttl_secs = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_MAX_PROMPT_LENGTH)? {
            config.prompt_length_warning = value;
        }
        if let Some(raw) = lookup(ENV_STRICT) {
            config.strict = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(crate::Error::config(format!(
                        "{ENV_STRICT}: expected a boolean, got '{raw}'"
                    )));
                }
            };
        }

        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn repository_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.repository_cache_ttl_secs)
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            max_prompt_length: self.prompt_length_warning,
            strict: self.strict,
        }
    }

    fn validate(&self) -> crate::Result<()> {
        let subdir = Path::new(&self.prompts_subdir);
        let single_component = matches!(
            subdir.components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );
        if !single_component {
            return Err(crate::Error::config(format!(
                "prompts_subdir must be a single relative directory name, got '{}'",
                self.prompts_subdir
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> crate::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| crate::Error::config(format!("{key}: invalid value '{raw}': {e}"))),
    }
}

/// Builder for [`PromptBlockEngine`] over the file system sources.
#[derive(Default)]
pub struct EngineBuilder {
    workspace: Option<PathBuf>,
    global: Option<PathBuf>,
    defaults: Option<PathBuf>,
    config: Option<EngineConfig>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace = Some(root.into());
        self
    }

    pub fn global_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.global = Some(root.into());
        self
    }

    /// Use `~/.prompt-blocks` as the global root, when a home directory exists.
    pub fn user_global_root(mut self) -> Self {
        if let Some(home) = home_dir() {
            self.global = Some(home.join(USER_GLOBAL_DIR));
        }
        self
    }

    pub fn defaults_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.defaults = Some(root.into());
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the file system watcher, e.g. with a [`ManualNotifier`](crate::ManualNotifier).
    pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> crate::Result<PromptBlockEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut paths = SearchPaths::new().subdir(config.prompts_subdir.clone());
        if let Some(root) = self.workspace {
            paths = paths.workspace(root);
        }
        if let Some(root) = self.global {
            paths = paths.global(root);
        }
        if let Some(root) = self.defaults {
            paths = paths.defaults(root);
        }
        if paths.is_empty() {
            return Err(crate::Error::config("no prompt block source configured"));
        }

        for source in SourceType::BY_PRECEDENCE {
            if let Some(dir) = paths.dir(source) {
                info!(source = %source, dir = %dir.display(), "prompt block source");
            }
        }

        let notifier: Arc<dyn ChangeNotifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(NotifyWatcher::new()),
        };
        let repository = FileBlockRepository::new(paths)
            .with_parser(BlockParser::new(config.validation_options()))
            .with_cache_ttl(config.repository_cache_ttl())
            .with_notifier(notifier);

        Ok(PromptBlockEngine::new(Arc::new(repository), config))
    }
}

/// Repository, loader and composer wired together.
pub struct PromptBlockEngine {
    config: EngineConfig,
    loader: LoadPromptBlocks,
    enhancer: EnhanceSystemPrompt,
}

impl PromptBlockEngine {
    pub fn new(repository: Arc<dyn BlockRepository>, config: EngineConfig) -> Self {
        let loader = LoadPromptBlocks::new(repository).with_cache_ttl(config.cache_ttl());
        Self {
            config,
            loader,
            enhancer: EnhanceSystemPrompt::new(),
        }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn BlockRepository> {
        self.loader.repository()
    }

    pub fn loader(&self) -> &LoadPromptBlocks {
        &self.loader
    }

    pub fn enhancer(&self) -> &EnhanceSystemPrompt {
        &self.enhancer
    }

    /// Look up `name` and activate it with `variables` at its own priority.
    pub async fn activate(
        &self,
        name: &str,
        variables: HashMap<String, String>,
    ) -> crate::Result<ActivePromptConfig> {
        let block = self.loader.execute_by_name(name).await.into_result()?;
        Ok(self.enhancer.create_active_prompt(block, variables, None))
    }
}

impl std::fmt::Debug for PromptBlockEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptBlockEngine")
            .field("config", &self.config)
            .field("loader", &self.loader)
            .finish()
    }
}
