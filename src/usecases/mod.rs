//! Host-facing use cases over a [`BlockRepository`](crate::BlockRepository).

mod enhance;
mod load;

pub use enhance::{ActivePromptConfig, ConflictResolution, EnhanceSystemPrompt, EnhancedPrompt};
pub use load::{LoadBlocksResult, LoadPromptBlocks};
