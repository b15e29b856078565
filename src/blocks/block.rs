//! Prompt block entity and its serialized data shape.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{PromptCategory, ValidationCode};

pub const DEFAULT_PRIORITY: i64 = 50;
pub const MIN_PRIORITY: i64 = 0;
pub const MAX_PRIORITY: i64 = 100;

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid block name regex"))
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}\s]+)\}\}").expect("valid placeholder regex"))
}

/// Whether `name` is a legal block identifier (`[A-Za-z0-9_-]+`).
pub fn is_valid_name(name: &str) -> bool {
    name_regex().is_match(name)
}

/// Distinct `{{name}}` placeholders in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in placeholder_regex().captures_iter(template) {
        let name = &cap[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

fn default_enabled() -> bool {
    true
}

fn default_output_format() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariableDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, alias = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Format hint for what the block asks the assistant to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutputDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_output_format")]
    pub format: String,
    #[serde(default)]
    pub description: String,
}

impl OutputDefinition {
    pub fn new(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Serialized form of a prompt block, as stored in `<name>.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptBlockData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: PromptCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub prompt: String,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    #[serde(default)]
    pub outputs: Vec<OutputDefinition>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PromptBlockData {
    pub fn new(
        name: impl Into<String>,
        category: PromptCategory,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category,
            tags: Vec::new(),
            prompt: prompt.into(),
            variables: Vec::new(),
            outputs: Vec::new(),
            priority: DEFAULT_PRIORITY,
            enabled: true,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn variable(mut self, variable: VariableDefinition) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn output(mut self, output: OutputDefinition) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// JSON Schema of the block file format.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(PromptBlockData)).unwrap_or_default()
    }
}

/// A validated, immutable prompt block.
///
/// The only way to obtain one is [`PromptBlock::create`] (or deserializing,
/// which goes through it). Modifiers return new instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PromptBlockData", into = "PromptBlockData")]
pub struct PromptBlock {
    name: String,
    description: String,
    category: PromptCategory,
    tags: Vec<String>,
    prompt: String,
    variables: Vec<VariableDefinition>,
    outputs: Vec<OutputDefinition>,
    priority: u8,
    enabled: bool,
}

impl PromptBlock {
    /// Build a block, failing with a validation error naming the offending field.
    pub fn create(data: PromptBlockData) -> crate::Result<Self> {
        if data.name.trim().is_empty() {
            return Err(crate::Error::validation(
                "name",
                "name is required",
                ValidationCode::MissingRequiredField,
            ));
        }
        if !is_valid_name(&data.name) {
            return Err(crate::Error::validation(
                "name",
                format!(
                    "'{}' may only contain letters, digits, '_' and '-'",
                    data.name
                ),
                ValidationCode::InvalidName,
            ));
        }
        if data.prompt.trim().is_empty() {
            return Err(crate::Error::validation(
                "prompt",
                "prompt must not be empty",
                ValidationCode::MissingRequiredField,
            ));
        }
        for (i, variable) in data.variables.iter().enumerate() {
            if variable.name.trim().is_empty() {
                return Err(crate::Error::validation(
                    format!("variables[{}].name", i),
                    "variable name is required",
                    ValidationCode::MissingVariableName,
                ));
            }
        }
        let priority = checked_priority(data.priority)?;

        Ok(Self {
            name: data.name,
            description: data.description,
            category: data.category,
            tags: data.tags,
            prompt: data.prompt,
            variables: data.variables,
            outputs: data.outputs,
            priority,
            enabled: data.enabled,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> PromptCategory {
        self.category
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn variables(&self) -> &[VariableDefinition] {
        &self.variables
    }

    pub fn outputs(&self) -> &[OutputDefinition] {
        &self.outputs
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_variables(&self) -> bool {
        !self.variables.is_empty()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn placeholders(&self) -> Vec<String> {
        placeholders(&self.prompt)
    }

    pub fn required_variables(&self) -> impl Iterator<Item = &VariableDefinition> {
        self.variables.iter().filter(|v| v.required)
    }

    /// Required variables with neither a supplied value nor a default.
    pub fn missing_required(&self, values: &HashMap<String, String>) -> Vec<&str> {
        self.required_variables()
            .filter(|v| !values.contains_key(&v.name) && v.default_value.is_none())
            .map(|v| v.name.as_str())
            .collect()
    }

    /// Substitute declared variables: supplied value, else default, else empty.
    ///
    /// Single pass over the template; substituted text is never re-scanned and
    /// undeclared placeholders are left verbatim.
    pub fn resolve_prompt(&self, values: &HashMap<String, String>) -> String {
        placeholder_regex()
            .replace_all(&self.prompt, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match self.variables.iter().find(|v| v.name == name) {
                    Some(variable) => values
                        .get(name)
                        .map(String::as_str)
                        .or(variable.default_value.as_deref())
                        .unwrap_or("")
                        .to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }

    pub fn with_priority(&self, priority: i64) -> crate::Result<Self> {
        Ok(Self {
            priority: checked_priority(priority)?,
            ..self.clone()
        })
    }

    pub fn to_data(&self) -> PromptBlockData {
        PromptBlockData {
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category,
            tags: self.tags.clone(),
            prompt: self.prompt.clone(),
            variables: self.variables.clone(),
            outputs: self.outputs.clone(),
            priority: i64::from(self.priority),
            enabled: self.enabled,
        }
    }
}

fn checked_priority(priority: i64) -> crate::Result<u8> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(crate::Error::validation(
            "priority",
            format!(
                "priority {} is outside {}..={}",
                priority, MIN_PRIORITY, MAX_PRIORITY
            ),
            ValidationCode::InvalidPriority,
        ));
    }
    u8::try_from(priority).map_err(|_| {
        crate::Error::validation(
            "priority",
            format!("priority {} does not fit", priority),
            ValidationCode::InvalidPriority,
        )
    })
}

impl TryFrom<PromptBlockData> for PromptBlock {
    type Error = crate::Error;

    fn try_from(data: PromptBlockData) -> Result<Self, Self::Error> {
        Self::create(data)
    }
}

impl From<PromptBlock> for PromptBlockData {
    fn from(block: PromptBlock) -> Self {
        block.to_data()
    }
}
