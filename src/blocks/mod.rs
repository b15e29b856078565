//! Prompt block model: category, entity, validation and parsing.

mod block;
mod category;
mod parser;
mod validation;

pub use block::{
    DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY, OutputDefinition, PromptBlock, PromptBlockData,
    VariableDefinition, is_valid_name, placeholders,
};
pub use category::PromptCategory;
pub use parser::{BlockParser, ParsedBlock, data_from_raw, parse_yaml, sanitize_content};
pub use validation::{
    BlockValidator, DEFAULT_MAX_PROMPT_LENGTH, ValidationCode, ValidationIssue, ValidationOptions,
    ValidationResult, ValidationWarning,
};
