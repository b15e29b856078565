use std::path::{Path, PathBuf};

use crate::common::SourceType;

pub const PROMPTS_SUBDIR: &str = "prompts";

/// Root directories of the three block sources.
///
/// Each root is searched under a fixed sub-directory (`prompts` by default).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPaths {
    workspace: Option<PathBuf>,
    global: Option<PathBuf>,
    defaults: Option<PathBuf>,
    subdir: String,
}

impl Default for SearchPaths {
    fn default() -> Self {
        Self {
            workspace: None,
            global: None,
            defaults: None,
            subdir: PROMPTS_SUBDIR.to_string(),
        }
    }
}

impl SearchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace = Some(root.into());
        self
    }

    pub fn global(mut self, root: impl Into<PathBuf>) -> Self {
        self.global = Some(root.into());
        self
    }

    pub fn defaults(mut self, root: impl Into<PathBuf>) -> Self {
        self.defaults = Some(root.into());
        self
    }

    pub fn subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = subdir.into();
        self
    }

    pub fn root(&self, source: SourceType) -> Option<&Path> {
        match source {
            SourceType::Workspace => self.workspace.as_deref(),
            SourceType::Global => self.global.as_deref(),
            SourceType::Defaults => self.defaults.as_deref(),
        }
    }

    /// Block directory of `source`, i.e. `<root>/<subdir>`.
    pub fn dir(&self, source: SourceType) -> Option<PathBuf> {
        self.root(source).map(|root| root.join(&self.subdir))
    }

    /// Configured block directories, highest precedence first.
    pub fn by_precedence(&self) -> Vec<(SourceType, PathBuf)> {
        SourceType::BY_PRECEDENCE
            .into_iter()
            .filter_map(|source| self.dir(source).map(|dir| (source, dir)))
            .collect()
    }

    /// Configured block directories, lowest precedence first.
    pub fn merge_order(&self) -> Vec<(SourceType, PathBuf)> {
        let mut dirs = self.by_precedence();
        dirs.reverse();
        dirs
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        self.by_precedence().into_iter().map(|(_, dir)| dir).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.workspace.is_none() && self.global.is_none() && self.defaults.is_none()
    }
}
