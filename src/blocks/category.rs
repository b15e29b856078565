use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Closed set of block categories. Conflicts are resolved per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PromptCategory {
    Analysis,
    Visualization,
    Reporting,
    Methodology,
}

impl PromptCategory {
    pub const ALL: [PromptCategory; 4] = [
        PromptCategory::Analysis,
        PromptCategory::Visualization,
        PromptCategory::Reporting,
        PromptCategory::Methodology,
    ];

    pub fn all() -> &'static [PromptCategory] {
        &Self::ALL
    }

    /// Wire name used in block files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Visualization => "visualization",
            Self::Reporting => "reporting",
            Self::Methodology => "methodology",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Analysis => "Analysis",
            Self::Visualization => "Visualization",
            Self::Reporting => "Reporting",
            Self::Methodology => "Methodology",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Analysis => "How data should be examined and interpreted",
            Self::Visualization => "How results should be charted or drawn",
            Self::Reporting => "How findings should be written up",
            Self::Methodology => "Process and rigor the assistant should follow",
        }
    }
}

impl std::fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown category '{}', expected one of: {}",
                    s,
                    Self::ALL.map(|c| c.as_str()).join(", ")
                )
            })
    }
}
