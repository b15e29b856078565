//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use prompt_blocks::prelude::*;
//! ```

pub use crate::Error;
pub use crate::Result;

// Engine
pub use crate::EngineBuilder;
pub use crate::EngineConfig;
pub use crate::PromptBlockEngine;

// Blocks
pub use crate::blocks::{PromptBlock, PromptBlockData, PromptCategory, VariableDefinition};

// Repository
pub use crate::repository::{BlockRepository, FileBlockRepository, SearchPaths};

// Use cases
pub use crate::usecases::{ActivePromptConfig, EnhanceSystemPrompt, LoadPromptBlocks};

// Common
pub use crate::common::SourceType;
