//! Model-rules table — read-only configuration mapping model identifiers
//! to context-window limits and cost constants.
//!
//! A default table ships embedded in the binary; users can point at an
//! override file with the same JSON shape. The table is loaded once at
//! startup and never written.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Embedded default rules, kept current with the upstream chat service.
const EMBEDDED_RULES: &str = include_str!("model_rules.json");

/// Per-model limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelRule {
    /// Context-window ceiling in tokens
    pub max_tokens: u64,
    /// Fraction of the window at which UIs should warn (0.0..=1.0)
    pub alert_threshold: f64,
}

/// The full rules table.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRules {
    /// Table revision, informational only
    #[serde(default)]
    pub version: String,
    /// Model assumed when nothing has been detected yet
    pub default_model: String,
    /// Fixed per-turn thinking cost, used when the payload does not
    /// report a thoughts breakdown
    pub thought_cost_per_turn: u64,
    /// Rules keyed by display model name
    pub models: HashMap<String, ModelRule>,
}

impl ModelRules {
    /// Load the rules table. With no override path the embedded table is
    /// used; an override file must carry the same JSON shape.
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let rules: Self = match override_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read model rules: {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid model rules file: {}", path.display()))?
            }
            None => serde_json::from_str(EMBEDDED_RULES).context("Embedded model rules invalid")?,
        };
        if !rules.models.contains_key(&rules.default_model) {
            anyhow::bail!(
                "Model rules must contain an entry for the default model '{}'",
                rules.default_model
            );
        }
        Ok(rules)
    }

    /// Look up the rule for a model name: exact key first, then the
    /// first substring match in either direction (keys tried in sorted
    /// order), then the default model's rule.
    pub fn rule_for(&self, model: &str) -> &ModelRule {
        if let Some(rule) = self.models.get(model) {
            return rule;
        }
        // Sorted so overlapping keys resolve the same way every run
        let mut keys: Vec<&String> = self.models.keys().collect();
        keys.sort();
        for key in keys {
            if model.contains(key.as_str()) || key.contains(model) {
                return &self.models[key];
            }
        }
        &self.models[&self.default_model]
    }

    /// Context-window ceiling for a model name, with fallback lookup.
    pub fn max_tokens_for(&self, model: &str) -> u64 {
        self.rule_for(model).max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_embedded_rules_load() {
        let rules = ModelRules::load(None).unwrap();
        assert!(!rules.default_model.is_empty());
        assert!(rules.models.contains_key(&rules.default_model));
        assert!(rules.thought_cost_per_turn > 0);
    }

    #[test]
    fn test_rule_for_exact_match() {
        let rules = ModelRules::load(None).unwrap();
        let rule = rules.rule_for("Gemini 2.5 Pro");
        assert_eq!(rule.max_tokens, 1_048_576);
    }

    #[test]
    fn test_rule_for_substring_match() {
        let rules = ModelRules::load(None).unwrap();
        // Detected names sometimes carry extra decoration
        let rule = rules.rule_for("Gemini 2.5 Pro (preview)");
        assert_eq!(rule.max_tokens, 1_048_576);
    }

    #[test]
    fn test_rule_for_overlapping_keys_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{
                "default_model": "Gemini 2.5",
                "thought_cost_per_turn": 50,
                "models": {
                    "Gemini 2.5": { "max_tokens": 1000, "alert_threshold": 0.8 },
                    "Gemini 2.5 Pro": { "max_tokens": 2000, "alert_threshold": 0.8 }
                }
            }"#,
        )
        .unwrap();
        let rules = ModelRules::load(Some(&path)).unwrap();
        // Both keys substring-match the label; the sorted-first key wins
        assert_eq!(rules.max_tokens_for("Gemini 2.5 Pro Experimental"), 1000);
    }

    #[test]
    fn test_rule_for_unknown_falls_back_to_default() {
        let rules = ModelRules::load(None).unwrap();
        let unknown = rules.rule_for("totally-unknown-model");
        let default = &rules.models[&rules.default_model];
        assert_eq!(unknown, default);
    }

    #[test]
    fn test_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{
                "default_model": "Test Model",
                "thought_cost_per_turn": 10,
                "models": { "Test Model": { "max_tokens": 1000, "alert_threshold": 0.5 } }
            }"#,
        )
        .unwrap();
        let rules = ModelRules::load(Some(&path)).unwrap();
        assert_eq!(rules.thought_cost_per_turn, 10);
        assert_eq!(rules.max_tokens_for("anything"), 1000);
    }

    #[test]
    fn test_override_missing_default_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{
                "default_model": "Ghost",
                "thought_cost_per_turn": 10,
                "models": { "Other": { "max_tokens": 1000, "alert_threshold": 0.5 } }
            }"#,
        )
        .unwrap();
        assert!(ModelRules::load(Some(&path)).is_err());
    }
}
