//! Block file parsing.
//!
//! Turns file content into a [`PromptBlock`]: sanitize, parse YAML into an
//! untyped field map, validate, convert, then build the entity.

use std::path::Path;

use serde_json::{Map, Value};

use super::{
    BlockValidator, OutputDefinition, PromptBlock, PromptBlockData, PromptCategory,
    ValidationCode, ValidationOptions, ValidationWarning, VariableDefinition,
};
use super::block::DEFAULT_PRIORITY;

/// Strip byte-order marks and normalize typographic punctuation that commonly
/// sneaks in through copy and paste.
pub fn sanitize_content(content: &str) -> String {
    let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);
    let mut out = String::with_capacity(content.len());

    for ch in content.chars() {
        match ch {
            '\u{00A0}' | '\u{202F}' | '\u{2007}' => out.push(' '),
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => {}
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' => out.push('-'),
            _ => out.push(ch),
        }
    }

    out
}

/// Parse YAML content into an untyped field map.
pub fn parse_yaml(content: &str) -> crate::Result<Value> {
    serde_yaml_bw::from_str::<Value>(content)
        .map_err(|e| crate::Error::config(format!("Failed to parse YAML: {}", e)))
}

fn str_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn variable_from_raw(map: &Map<String, Value>) -> VariableDefinition {
    VariableDefinition {
        name: str_field(map, "name").trim().to_string(),
        description: str_field(map, "description"),
        required: map.get("required").and_then(Value::as_bool).unwrap_or(false),
        default_value: map
            .get("default")
            .or_else(|| map.get("defaultValue"))
            .and_then(scalar_to_string),
    }
}

fn output_from_raw(value: &Value) -> Option<OutputDefinition> {
    match value {
        Value::String(format) => Some(OutputDefinition::new("", format.clone())),
        Value::Object(map) => Some(OutputDefinition {
            name: str_field(map, "name"),
            format: map
                .get("format")
                .and_then(Value::as_str)
                .unwrap_or("text")
                .to_string(),
            description: str_field(map, "description"),
        }),
        _ => None,
    }
}

/// Convert a validated raw field map into block data.
pub fn data_from_raw(raw: &Value) -> crate::Result<PromptBlockData> {
    let map = raw.as_object().ok_or_else(|| {
        crate::Error::validation("", "block must be a mapping", ValidationCode::NotAnObject)
    })?;

    let category = str_field(map, "category")
        .parse::<PromptCategory>()
        .map_err(|message| {
            crate::Error::validation("category", message, ValidationCode::InvalidCategory)
        })?;

    let mut variables: Vec<VariableDefinition> = Vec::new();
    for variable in map
        .get("variables")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .map(variable_from_raw)
    {
        if variable.name.is_empty() || !variables.iter().any(|v| v.name == variable.name) {
            variables.push(variable);
        }
    }

    Ok(PromptBlockData {
        name: str_field(map, "name"),
        description: str_field(map, "description"),
        category,
        tags: map
            .get("tags")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        prompt: str_field(map, "prompt"),
        variables,
        outputs: map
            .get("outputs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(output_from_raw)
            .collect(),
        priority: map
            .get("priority")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_PRIORITY),
        enabled: map.get("enabled").and_then(Value::as_bool).unwrap_or(true),
    })
}

/// A parsed block together with the non-blocking validation warnings.
#[derive(Debug, Clone)]
pub struct ParsedBlock {
    pub block: PromptBlock,
    pub warnings: Vec<ValidationWarning>,
}

/// Loads prompt blocks from YAML content or files.
#[derive(Debug, Clone, Default)]
pub struct BlockParser {
    validator: BlockValidator,
}

impl BlockParser {
    pub fn new(options: ValidationOptions) -> Self {
        Self {
            validator: BlockValidator::new(options),
        }
    }

    pub fn validator(&self) -> &BlockValidator {
        &self.validator
    }

    /// Parse block content; `path` is used for error context only.
    pub fn parse_content(&self, content: &str, path: Option<&Path>) -> crate::Result<ParsedBlock> {
        let attach = |e: crate::Error| match path {
            Some(p) => e.with_path(p),
            None => e,
        };

        let raw = parse_yaml(&sanitize_content(content)).map_err(attach)?;
        let warnings = self.validator.validate(&raw).into_result()?;
        let block = PromptBlock::create(data_from_raw(&raw)?)?;

        if let Some(path) = path {
            for warning in &warnings {
                tracing::debug!(
                    path = %path.display(),
                    field = %warning.field,
                    "{}",
                    warning.message
                );
            }
        }

        Ok(ParsedBlock { block, warnings })
    }

    pub fn parse(&self, content: &str) -> crate::Result<PromptBlock> {
        self.parse_content(content, None).map(|parsed| parsed.block)
    }

    pub async fn load_file(&self, path: &Path) -> crate::Result<PromptBlock> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| crate::Error::io(path, e))?;
        self.parse_content(&content, Some(path))
            .map(|parsed| parsed.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name: weekly-report
description: Weekly status report
category: reporting
tags: [status, weekly]
prompt: |
  Summarize progress for {{team}} in {{format}}.
variables:
  - name: team
    description: Team name
    required: true
  - name: format
    default: bullet points
outputs:
  - name: report
    format: markdown
  - plain
priority: 75
"#;

    #[test]
    fn test_sanitize_content() {
        let dirty = "\u{FEFF}name:\u{00A0}x\u{200B}\nquote: \u{201C}hi\u{201D} \u{2018}a\u{2019}\ndash: a\u{2014}b\u{2013}c";
        assert_eq!(
            sanitize_content(dirty),
            "name: x\nquote: \"hi\" 'a'\ndash: a-b-c"
        );
    }

    #[test]
    fn test_sanitize_leaves_plain_text() {
        let clean = "name: plain\nprompt: Hello {{who}}";
        assert_eq!(sanitize_content(clean), clean);
    }

    #[test]
    fn test_parse_valid_block() {
        let parser = BlockParser::default();
        let parsed = parser.parse_content(VALID, None).unwrap();
        let block = parsed.block;

        assert_eq!(block.name(), "weekly-report");
        assert_eq!(block.category(), PromptCategory::Reporting);
        assert_eq!(block.tags(), ["status", "weekly"]);
        assert_eq!(block.priority(), 75);
        assert!(block.is_enabled());
        assert_eq!(block.variables().len(), 2);
        assert!(block.variables()[0].required);
        assert_eq!(
            block.variables()[1].default_value.as_deref(),
            Some("bullet points")
        );
        assert_eq!(block.outputs().len(), 2);
        assert_eq!(block.outputs()[0].format, "markdown");
        assert_eq!(block.outputs()[1].format, "plain");
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
    }

    #[test]
    fn test_defaults_applied() {
        let block = BlockParser::default()
            .parse("name: minimal\ncategory: analysis\nprompt: Look closely.")
            .unwrap();
        assert_eq!(block.priority(), 50);
        assert!(block.is_enabled());
        assert_eq!(block.description(), "");
        assert!(block.tags().is_empty());
    }

    #[test]
    fn test_numeric_default_stringified() {
        let block = BlockParser::default()
            .parse(
                "name: n\ncategory: analysis\nprompt: Top {{k}}\nvariables:\n  - name: k\n    default: 10\n",
            )
            .unwrap();
        assert_eq!(block.resolve_prompt(&Default::default()), "Top 10");
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = BlockParser::default()
            .parse_content("name: [unclosed\nprompt: x", Some(Path::new("/p/bad.yaml")))
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.context().contains_key("path"));
    }

    #[test]
    fn test_invalid_block_is_validation_error() {
        let err = BlockParser::default()
            .parse("name: ok\ncategory: charts\nprompt: x")
            .unwrap_err();
        assert_eq!(err.field(), Some("category"));
    }

    #[test]
    fn test_curly_quotes_in_source_parse() {
        let content = "name: quoted\ncategory: methodology\nprompt: \u{201C}Be rigorous\u{201D}\n";
        let block = BlockParser::default().parse(content).unwrap();
        assert_eq!(block.prompt(), "Be rigorous");
    }

    #[tokio::test]
    async fn test_load_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("weekly-report.yaml");
        tokio::fs::write(&path, VALID).await.unwrap();

        let block = BlockParser::default().load_file(&path).await.unwrap();
        assert_eq!(block.name(), "weekly-report");

        let err = BlockParser::default()
            .load_file(&temp.path().join("missing.yaml"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
    }
}
