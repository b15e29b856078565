//! # prompt-blocks
//!
//! Reusable prompt blocks for AI coding assistants.
//!
//! A prompt block is a named, categorized instruction fragment stored as a YAML
//! file. Blocks are resolved across three ranked sources (workspace, global,
//! defaults), validated, cached, and merged into a running system prompt with
//! deterministic per-category conflict resolution.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prompt_blocks::{EngineBuilder, PromptBlockEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), prompt_blocks::Error> {
//!     let engine: PromptBlockEngine = EngineBuilder::new()
//!         .workspace_root("./project")
//!         .user_global_root()
//!         .build()?;
//!
//!     let loaded = engine.loader().execute().await?;
//!     let active: Vec<_> = loaded
//!         .blocks
//!         .iter()
//!         .take(2)
//!         .map(|block| engine.enhancer().create_active_prompt(block.clone(), Default::default(), None))
//!         .collect();
//!
//!     let enhanced = engine.enhancer().execute("You are an AI assistant.", &active);
//!     println!("{}", enhanced.enhanced_prompt);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod blocks;
pub mod common;
pub mod engine;
pub mod prelude;
pub mod repository;
pub mod usecases;
pub mod watch;

use std::collections::BTreeMap;
use std::path::PathBuf;

pub use blocks::{
    BlockParser, BlockValidator, OutputDefinition, PromptBlock, PromptBlockData, PromptCategory,
    ValidationCode, ValidationIssue, ValidationOptions, ValidationResult, ValidationWarning,
    VariableDefinition, sanitize_content,
};
pub use common::{CacheStats, SourceType, VersionedCache};
pub use engine::{EngineBuilder, EngineConfig, PromptBlockEngine};
pub use repository::{
    BlockLookup, BlockRepository, FileBlockRepository, InMemoryBlockRepository, SearchPaths,
};
pub use usecases::{
    ActivePromptConfig, ConflictResolution, EnhanceSystemPrompt, EnhancedPrompt,
    LoadBlocksResult, LoadPromptBlocks,
};
pub use watch::{ChangeCallback, ChangeNotifier, ManualNotifier, NotifyWatcher, WatchHandle};

/// Error type for prompt block operations.
///
/// Every variant maps to a stable [`Error::code`] and a context map so hosts can
/// render structured feedback without matching on message text.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Block source could not be parsed or has the wrong overall shape.
    #[error("Configuration error{}: {message}", path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// A domain invariant was violated while building a block.
    #[error("Validation failed for field '{field}': {message}")]
    Validation {
        field: String,
        message: String,
        code: ValidationCode,
    },

    /// Block name rejected before touching the file system.
    #[error("Invalid prompt block name '{name}': only letters, digits, '_' and '-' are allowed")]
    InvalidName { name: String },

    /// No source holds a block with this name.
    #[error("Prompt block '{name}' not found")]
    NotFound { name: String },

    /// File system operation failed.
    #[error("IO error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory watch could not be established.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Background load task panicked or was aborted.
    #[error("Background load failed: {0}")]
    Task(String),
}

/// Coarse error taxonomy shared with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed source or schema.
    Config,
    /// Domain invariant violation.
    Validation,
    /// File read, enumeration or watch failure.
    Io,
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            path: None,
        }
    }

    pub fn validation(
        field: impl Into<String>,
        message: impl Into<String>,
        code: ValidationCode,
    ) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
            code,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a file path to errors that can carry one.
    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Error::Config { message, .. } => Error::Config {
                message,
                path: Some(path.into()),
            },
            other => other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::InvalidName { .. } => "INVALID_NAME",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Io { .. } => "IO_ERROR",
            Error::Watch(_) => "WATCH_ERROR",
            Error::Task(_) => "TASK_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } => ErrorKind::Config,
            Error::Validation { .. } | Error::InvalidName { .. } => ErrorKind::Validation,
            Error::NotFound { .. } | Error::Io { .. } | Error::Watch(_) | Error::Task(_) => {
                ErrorKind::Io
            }
        }
    }

    pub fn context(&self) -> BTreeMap<&'static str, String> {
        let mut ctx = BTreeMap::new();
        match self {
            Error::Config { path, .. } => {
                if let Some(path) = path {
                    ctx.insert("path", path.display().to_string());
                }
            }
            Error::Validation { field, code, .. } => {
                ctx.insert("field", field.clone());
                ctx.insert("validationCode", code.as_str().to_string());
            }
            Error::InvalidName { name } | Error::NotFound { name } => {
                ctx.insert("name", name.clone());
            }
            Error::Io { path, source } => {
                ctx.insert("path", path.display().to_string());
                ctx.insert("ioKind", format!("{:?}", source.kind()));
            }
            Error::Watch(e) => {
                if !e.paths.is_empty() {
                    let paths: Vec<String> =
                        e.paths.iter().map(|p| p.display().to_string()).collect();
                    ctx.insert("path", paths.join(", "));
                }
            }
            Error::Task(_) => {}
        }
        ctx
    }

    /// The offending field for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation { field, .. } => Some(field),
            Error::InvalidName { .. } => Some("name"),
            _ => None,
        }
    }

    pub fn is_validation_error(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::validation("name", "must not be empty", ValidationCode::MissingRequiredField);
        assert!(err.to_string().contains("'name'"));
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::config("bad yaml").kind(), ErrorKind::Config);
        assert_eq!(
            Error::InvalidName {
                name: "../etc".into()
            }
            .kind(),
            ErrorKind::Validation
        );
        let io = Error::io(
            "/tmp/x.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(io.kind(), ErrorKind::Io);
        assert_eq!(io.code(), "IO_ERROR");
    }

    #[test]
    fn test_error_context() {
        let err = Error::config("not a mapping").with_path("/p/prompts/a.yaml");
        let ctx = err.context();
        assert_eq!(ctx.get("path").map(String::as_str), Some("/p/prompts/a.yaml"));
        assert!(err.to_string().contains("/p/prompts/a.yaml"));

        let err = Error::validation("priority", "out of range", ValidationCode::InvalidPriority);
        let ctx = err.context();
        assert_eq!(ctx.get("field").map(String::as_str), Some("priority"));
        assert_eq!(
            ctx.get("validationCode").map(String::as_str),
            Some("INVALID_PRIORITY")
        );
    }

    #[test]
    fn test_watch_error_context_keeps_every_path() {
        let err = Error::from(
            notify::Error::generic("watch limit reached")
                .add_path(PathBuf::from("/ws/prompts"))
                .add_path(PathBuf::from("/home/u/.prompt-blocks/prompts")),
        );
        assert_eq!(
            err.context().get("path").map(String::as_str),
            Some("/ws/prompts, /home/u/.prompt-blocks/prompts")
        );
    }
}
