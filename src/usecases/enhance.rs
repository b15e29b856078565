//! System prompt composition.
//!
//! Active blocks are reduced to one survivor per category (highest effective
//! priority, first activation on a tie), ordered by priority, resolved against
//! their variable values and appended to the base prompt.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::blocks::{MAX_PRIORITY, PromptBlock, PromptCategory};

const SEPARATOR: &str = "\n\n";

/// A block activated for the next composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePromptConfig {
    pub block: PromptBlock,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Effective priority; the block's own priority unless overridden.
    #[serde(deserialize_with = "effective_priority")]
    priority: u8,
}

fn effective_priority<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let priority = u8::deserialize(deserializer)?;
    if i64::from(priority) > MAX_PRIORITY {
        return Err(serde::de::Error::custom(format!(
            "priority {} is outside 0..={}",
            priority, MAX_PRIORITY
        )));
    }
    Ok(priority)
}

impl ActivePromptConfig {
    pub fn new(block: PromptBlock) -> Self {
        let priority = block.priority();
        Self {
            block,
            variables: HashMap::new(),
            priority,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Override the effective priority, capped at the block priority range.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY as u8);
        self
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn category(&self) -> PromptCategory {
        self.block.category()
    }

    pub fn resolved_prompt(&self) -> String {
        self.block.resolve_prompt(&self.variables)
    }
}

/// One losing activation in a same-category conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub category: PromptCategory,
    pub previous_block: String,
    pub selected_block: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedPrompt {
    pub original_prompt: String,
    pub enhanced_prompt: String,
    /// Surviving activations in concatenation order.
    pub applied_prompts: Vec<ActivePromptConfig>,
    pub conflict_resolution: Vec<ConflictResolution>,
    pub total_length: usize,
    pub added_length: i64,
}

impl EnhancedPrompt {
    pub fn is_enhanced(&self) -> bool {
        !self.applied_prompts.is_empty()
    }
}

struct Resolved<'a> {
    /// `(activation index, config)` in first-seen category order.
    survivors: Vec<(usize, &'a ActivePromptConfig)>,
    conflicts: Vec<ConflictResolution>,
}

/// Merges active blocks into a system prompt. Stateless and infallible.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnhanceSystemPrompt;

impl EnhanceSystemPrompt {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(&self, original_prompt: &str, active: &[ActivePromptConfig]) -> EnhancedPrompt {
        let Resolved {
            mut survivors,
            conflicts,
        } = Self::resolve_conflicts(active);

        survivors.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));

        let enhanced_prompt = if survivors.is_empty() {
            original_prompt.to_string()
        } else {
            let base = original_prompt.trim_end();
            let bodies: Vec<String> = survivors
                .iter()
                .map(|(_, config)| config.resolved_prompt().trim().to_string())
                .collect();

            std::iter::once(base)
                .filter(|base| !base.is_empty())
                .chain(bodies.iter().map(String::as_str).filter(|b| !b.is_empty()))
                .collect::<Vec<_>>()
                .join(SEPARATOR)
        };

        let total_length = enhanced_prompt.chars().count();
        let added_length = total_length as i64 - original_prompt.chars().count() as i64;

        debug!(
            applied = survivors.len(),
            conflicts = conflicts.len(),
            added_length,
            "system prompt enhanced"
        );

        EnhancedPrompt {
            original_prompt: original_prompt.to_string(),
            enhanced_prompt,
            applied_prompts: survivors.into_iter().map(|(_, c)| c.clone()).collect(),
            conflict_resolution: conflicts,
            total_length,
            added_length,
        }
    }

    pub fn create_active_prompt(
        &self,
        block: PromptBlock,
        variables: HashMap<String, String>,
        priority: Option<u8>,
    ) -> ActivePromptConfig {
        let config = ActivePromptConfig::new(block).with_variables(variables);
        match priority {
            Some(priority) => config.with_priority(priority),
            None => config,
        }
    }

    /// `"<Category>: <block>"` per category that would be applied, joined by `", "`.
    pub fn generate_prompt_summary(&self, active: &[ActivePromptConfig]) -> String {
        Self::resolve_conflicts(active)
            .survivors
            .iter()
            .map(|(_, config)| {
                format!(
                    "{}: {}",
                    config.category().display_name(),
                    config.block.name()
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn resolve_conflicts(active: &[ActivePromptConfig]) -> Resolved<'_> {
        let mut groups: Vec<(PromptCategory, Vec<(usize, &ActivePromptConfig)>)> = Vec::new();
        for (index, config) in active.iter().enumerate() {
            match groups.iter_mut().find(|(c, _)| *c == config.category()) {
                Some((_, members)) => members.push((index, config)),
                None => groups.push((config.category(), vec![(index, config)])),
            }
        }

        let mut survivors = Vec::with_capacity(groups.len());
        let mut conflicts = Vec::new();

        for (category, members) in groups {
            let Some(winner) = members
                .iter()
                .copied()
                .reduce(|best, next| if next.1.priority > best.1.priority { next } else { best })
            else {
                continue;
            };

            for (index, loser) in members.iter().copied() {
                if index == winner.0 {
                    continue;
                }
                debug!(
                    category = %category,
                    selected = winner.1.block.name(),
                    dropped = loser.block.name(),
                    "prompt block conflict resolved"
                );
                conflicts.push(ConflictResolution {
                    category,
                    previous_block: loser.block.name().to_string(),
                    selected_block: winner.1.block.name().to_string(),
                    reason: format!(
                        "Higher priority ({} vs {})",
                        winner.1.priority, loser.priority
                    ),
                });
            }

            survivors.push(winner);
        }

        Resolved {
            survivors,
            conflicts,
        }
    }
}
