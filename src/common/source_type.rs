use serde::{Deserialize, Serialize};

/// Origin of a prompt block file, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Workspace,
    Global,
    Defaults,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workspace => write!(f, "workspace"),
            Self::Global => write!(f, "global"),
            Self::Defaults => write!(f, "defaults"),
        }
    }
}

impl SourceType {
    /// Sources in lookup order: workspace, global, defaults.
    pub const BY_PRECEDENCE: [SourceType; 3] =
        [SourceType::Workspace, SourceType::Global, SourceType::Defaults];

    /// Sources in merge order, lowest precedence first.
    pub const MERGE_ORDER: [SourceType; 3] =
        [SourceType::Defaults, SourceType::Global, SourceType::Workspace];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(SourceType::Workspace.to_string(), "workspace");
        assert_eq!(SourceType::Global.to_string(), "global");
        assert_eq!(SourceType::Defaults.to_string(), "defaults");
    }

    #[test]
    fn test_precedence_orders_agree() {
        let mut by_precedence = SourceType::BY_PRECEDENCE;
        by_precedence.reverse();
        assert_eq!(by_precedence, SourceType::MERGE_ORDER);
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&SourceType::Global).unwrap();
        assert_eq!(json, "\"global\"");

        let parsed: SourceType = serde_json::from_str("\"workspace\"").unwrap();
        assert_eq!(parsed, SourceType::Workspace);
    }
}
