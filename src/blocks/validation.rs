//! Block validation.
//!
//! Validates the raw field map of a block file in two phases: a schema phase
//! checking field types, then a semantic phase checking domain rules.
//! Validation never fails; problems are returned as data.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::block::{MAX_PRIORITY, MIN_PRIORITY, is_valid_name, placeholders};
use super::PromptCategory;

pub const DEFAULT_MAX_PROMPT_LENGTH: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    NotAnObject,
    MissingRequiredField,
    InvalidFieldType,
    InvalidName,
    InvalidCategory,
    InvalidPriority,
    PromptTooLong,
    MissingVariableName,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAnObject => "NOT_AN_OBJECT",
            Self::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            Self::InvalidFieldType => "INVALID_FIELD_TYPE",
            Self::InvalidName => "INVALID_NAME",
            Self::InvalidCategory => "INVALID_CATEGORY",
            Self::InvalidPriority => "INVALID_PRIORITY",
            Self::PromptTooLong => "PROMPT_TOO_LONG",
            Self::MissingVariableName => "MISSING_VARIABLE_NAME",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub code: ValidationCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>, code: ValidationCode) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            code,
        });
        self.is_valid = false;
    }

    pub fn warn(
        &mut self,
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: Option<&str>,
    ) {
        self.warnings.push(ValidationWarning {
            field: field.into(),
            message: message.into(),
            suggestion: suggestion.map(str::to_string),
        });
    }

    pub fn has_error_for(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// First error as a typed failure, or the warnings when valid.
    pub fn into_result(self) -> crate::Result<Vec<ValidationWarning>> {
        match self.errors.into_iter().next() {
            None => Ok(self.warnings),
            Some(issue) => Err(crate::Error::validation(
                issue.field,
                issue.message,
                issue.code,
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationOptions {
    /// Prompt length (in characters) above which a warning is raised.
    pub max_prompt_length: usize,
    /// Turn the prompt length warning into an error.
    pub strict: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_prompt_length: DEFAULT_MAX_PROMPT_LENGTH,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
    Scalar,
}

impl ValueType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
            ValueType::Scalar => value.is_string() || value.is_number() || value.is_boolean(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Scalar => "string, number or boolean",
        }
    }
}

const FIELD_TYPES: &[(&str, ValueType)] = &[
    ("name", ValueType::String),
    ("description", ValueType::String),
    ("category", ValueType::String),
    ("tags", ValueType::Array),
    ("prompt", ValueType::String),
    ("variables", ValueType::Array),
    ("outputs", ValueType::Array),
    ("priority", ValueType::Integer),
    ("enabled", ValueType::Boolean),
];

const VARIABLE_FIELD_TYPES: &[(&str, ValueType)] = &[
    ("name", ValueType::String),
    ("description", ValueType::String),
    ("required", ValueType::Boolean),
    ("default", ValueType::Scalar),
    ("defaultValue", ValueType::Scalar),
];

const REQUIRED_FIELDS: &[&str] = &["name", "category", "prompt"];

/// Fields that are present and not null.
fn present<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_type(
    result: &mut ValidationResult,
    field: &str,
    value: &Value,
    expected: ValueType,
) -> bool {
    if expected.matches(value) {
        return true;
    }
    result.error(
        field,
        format!(
            "expected {}, got {}",
            expected.name(),
            value_type_name(value)
        ),
        ValidationCode::InvalidFieldType,
    );
    false
}

#[derive(Debug, Clone, Default)]
pub struct BlockValidator {
    options: ValidationOptions,
}

impl BlockValidator {
    pub fn new(options: ValidationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    pub fn validate(&self, raw: &Value) -> ValidationResult {
        let mut result = ValidationResult::valid();

        let Some(map) = raw.as_object() else {
            result.error(
                "",
                format!(
                    "block must be a mapping of fields, got {}",
                    value_type_name(raw)
                ),
                ValidationCode::NotAnObject,
            );
            return result;
        };

        self.check_schema(map, &mut result);
        self.check_semantics(map, &mut result);
        result
    }

    fn check_schema(&self, map: &Map<String, Value>, result: &mut ValidationResult) {
        for (field, expected) in FIELD_TYPES {
            if let Some(value) = present(map, field) {
                check_type(result, field, value, *expected);
            }
        }

        if let Some(Value::Array(tags)) = present(map, "tags") {
            for (i, tag) in tags.iter().enumerate() {
                check_type(result, &format!("tags[{}]", i), tag, ValueType::String);
            }
        }

        if let Some(Value::Array(variables)) = present(map, "variables") {
            for (i, variable) in variables.iter().enumerate() {
                let field = format!("variables[{}]", i);
                let Some(var_map) = variable.as_object() else {
                    check_type(result, &field, variable, ValueType::Object);
                    continue;
                };
                for (key, expected) in VARIABLE_FIELD_TYPES {
                    if let Some(value) = present(var_map, key) {
                        check_type(result, &format!("{}.{}", field, key), value, *expected);
                    }
                }
            }
        }

        if let Some(Value::Array(outputs)) = present(map, "outputs") {
            for (i, output) in outputs.iter().enumerate() {
                if !(output.is_object() || output.is_string()) {
                    result.error(
                        format!("outputs[{}]", i),
                        format!(
                            "expected object or string, got {}",
                            value_type_name(output)
                        ),
                        ValidationCode::InvalidFieldType,
                    );
                }
            }
        }
    }

    fn check_semantics(&self, map: &Map<String, Value>, result: &mut ValidationResult) {
        for field in REQUIRED_FIELDS {
            if present(map, field).is_none() {
                result.error(
                    *field,
                    format!("'{}' is required", field),
                    ValidationCode::MissingRequiredField,
                );
            }
        }

        if let Some(name) = present(map, "name").and_then(Value::as_str) {
            if name.trim().is_empty() {
                result.error("name", "name must not be empty", ValidationCode::MissingRequiredField);
            } else if !is_valid_name(name) {
                result.error(
                    "name",
                    format!(
                        "'{}' may only contain letters, digits, '_' and '-'",
                        name
                    ),
                    ValidationCode::InvalidName,
                );
            }
        }

        if let Some(category) = present(map, "category").and_then(Value::as_str)
            && let Err(message) = category.parse::<PromptCategory>()
        {
            result.error("category", message, ValidationCode::InvalidCategory);
        }

        if let Some(priority) = present(map, "priority").and_then(Value::as_i64)
            && !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority)
        {
            result.error(
                "priority",
                format!(
                    "priority {} is outside {}..={}",
                    priority, MIN_PRIORITY, MAX_PRIORITY
                ),
                ValidationCode::InvalidPriority,
            );
        }
        if let Some(priority) = present(map, "priority").and_then(Value::as_u64)
            && priority > MAX_PRIORITY as u64
            && !result.has_error_for("priority")
        {
            result.error(
                "priority",
                format!("priority {} is outside {}..={}", priority, MIN_PRIORITY, MAX_PRIORITY),
                ValidationCode::InvalidPriority,
            );
        }

        let prompt = present(map, "prompt").and_then(Value::as_str);
        if let Some(prompt) = prompt {
            self.check_prompt(prompt, result);
        }

        let declared = self.check_variables(map, result);

        if let Some(prompt) = prompt {
            for placeholder in placeholders(prompt) {
                if !declared.contains(&placeholder) {
                    result.warn(
                        "prompt",
                        format!("placeholder '{{{{{}}}}}' is not declared", placeholder),
                        Some("declare it under 'variables' or it will be left verbatim"),
                    );
                }
            }
            let used: HashSet<String> = placeholders(prompt).into_iter().collect();
            for name in &declared {
                if !used.contains(name) {
                    result.warn(
                        "variables",
                        format!("variable '{}' is declared but never used", name),
                        Some("remove it or reference it as {{name}} in the prompt"),
                    );
                }
            }
        }

        if present(map, "description")
            .and_then(Value::as_str)
            .is_none_or(|d| d.trim().is_empty())
        {
            result.warn(
                "description",
                "no description provided",
                Some("add a short description so the block is easy to pick"),
            );
        }

        match present(map, "tags").and_then(Value::as_array) {
            None => result.warn("tags", "no tags provided", Some("add tags to aid discovery")),
            Some(tags) if tags.is_empty() => {
                result.warn("tags", "no tags provided", Some("add tags to aid discovery"))
            }
            Some(tags) => {
                let mut seen = HashSet::new();
                for tag in tags.iter().filter_map(Value::as_str) {
                    if !seen.insert(tag.to_lowercase()) {
                        result.warn("tags", format!("duplicate tag '{}'", tag), None);
                    }
                }
            }
        }
    }

    fn check_prompt(&self, prompt: &str, result: &mut ValidationResult) {
        if prompt.trim().is_empty() {
            result.error(
                "prompt",
                "prompt must not be empty",
                ValidationCode::MissingRequiredField,
            );
            return;
        }

        let length = prompt.chars().count();
        if length > self.options.max_prompt_length {
            let message = format!(
                "prompt is {} characters, above the {} character limit",
                length, self.options.max_prompt_length
            );
            if self.options.strict {
                result.error("prompt", message, ValidationCode::PromptTooLong);
            } else {
                result.warn(
                    "prompt",
                    message,
                    Some("split the block or shorten the prompt"),
                );
            }
        }
    }

    /// Validate variable declarations, returning the declared names.
    fn check_variables(
        &self,
        map: &Map<String, Value>,
        result: &mut ValidationResult,
    ) -> Vec<String> {
        let mut declared: Vec<String> = Vec::new();
        let Some(variables) = present(map, "variables").and_then(Value::as_array) else {
            return declared;
        };

        for (i, variable) in variables.iter().enumerate() {
            let Some(var_map) = variable.as_object() else {
                continue;
            };
            let field = format!("variables[{}].name", i);

            let name = present(var_map, "name").and_then(Value::as_str).map(str::trim);
            let Some(name) = name.filter(|n| !n.is_empty()) else {
                if !result.has_error_for(&field) {
                    result.error(field, "variable name is required", ValidationCode::MissingVariableName);
                }
                continue;
            };

            if declared.iter().any(|d| d == name) {
                result.warn(
                    field,
                    format!("variable '{}' is declared more than once", name),
                    Some("the first declaration's default wins"),
                );
                continue;
            }

            let required = present(var_map, "required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let has_default = present(var_map, "default").is_some()
                || present(var_map, "defaultValue").is_some();
            if required && has_default {
                result.warn(
                    format!("variables[{}]", i),
                    format!("required variable '{}' also has a default", name),
                    Some("a default makes 'required' ineffective"),
                );
            }

            declared.push(name.to_string());
        }

        declared
    }
}
