//! Prompt module for LLM-based operations.
//!
//! This module provides the prompt templates for the extraction and
//! evaluation chains and the [`PromptSet`] that bundles them. The built-in
//! set can be overridden key by key from a YAML file.

pub mod evaluation;
pub mod extraction;
pub mod template;

pub use template::{comma_list, fill, placeholders};

use crate::error::{Result, SkgcError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// All templates used in one run.
///
/// Missing keys in a YAML override fall back to the built-in text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub agent_persona: String,
    pub assistant_persona: String,
    pub literal_extraction: String,
    pub expanded_extraction: String,
    pub self_review: String,
    pub check_keyword_list: String,
    pub order_lists: String,
    pub count_matches: String,
    pub check_ordered_lists: String,
    pub check_count: String,
    pub correction: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            agent_persona: extraction::AGENT_PERSONA.to_string(),
            assistant_persona: extraction::ASSISTANT_PERSONA.to_string(),
            literal_extraction: extraction::LITERAL_EXTRACTION.to_string(),
            expanded_extraction: extraction::EXPANDED_EXTRACTION.to_string(),
            self_review: extraction::SELF_REVIEW.to_string(),
            check_keyword_list: extraction::CHECK_KEYWORD_LIST.to_string(),
            order_lists: evaluation::ORDER_LISTS.to_string(),
            count_matches: evaluation::COUNT_MATCHES.to_string(),
            check_ordered_lists: evaluation::CHECK_ORDERED_LISTS.to_string(),
            check_count: evaluation::CHECK_COUNT.to_string(),
            correction: extraction::CORRECTION.to_string(),
        }
    }
}

/// (key, allowed placeholders, required placeholders)
type TemplateRule = (&'static str, &'static [&'static str], &'static [&'static str]);

const RULES: &[TemplateRule] = &[
    ("agent_persona", &[], &[]),
    ("assistant_persona", &[], &[]),
    ("literal_extraction", &["title", "keywords", "abstract"], &[]),
    ("expanded_extraction", &["literal_keywords"], &["literal_keywords"]),
    ("self_review", &["expanded_keywords"], &["expanded_keywords"]),
    ("check_keyword_list", &["agent_output"], &["agent_output"]),
    (
        "order_lists",
        &["candidate_label", "reference_label", "candidate_keywords", "reference_keywords"],
        &["candidate_keywords", "reference_keywords"],
    ),
    (
        "count_matches",
        &["candidate_label", "reference_label", "candidate_ordered", "reference_ordered"],
        &["candidate_ordered", "reference_ordered"],
    ),
    (
        "check_ordered_lists",
        &["agent_output", "candidate_label", "reference_label"],
        &["agent_output"],
    ),
    ("check_count", &["agent_output"], &["agent_output"]),
    (
        "correction",
        &["agent_output", "rejected_output", "rejection_reason"],
        &["rejected_output"],
    ),
];

impl PromptSet {
    /// Load a YAML override file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let set: PromptSet = serde_yaml::from_str(&content)?;
        set.validate()?;
        info!(path = %path.display(), "Loaded prompt set");
        Ok(set)
    }

    /// Serialize the set as YAML (used to dump the built-in prompts).
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn template(&self, key: &str) -> Option<&str> {
        let text = match key {
            "agent_persona" => &self.agent_persona,
            "assistant_persona" => &self.assistant_persona,
            "literal_extraction" => &self.literal_extraction,
            "expanded_extraction" => &self.expanded_extraction,
            "self_review" => &self.self_review,
            "check_keyword_list" => &self.check_keyword_list,
            "order_lists" => &self.order_lists,
            "count_matches" => &self.count_matches,
            "check_ordered_lists" => &self.check_ordered_lists,
            "check_count" => &self.check_count,
            "correction" => &self.correction,
            _ => return None,
        };
        Some(text.as_str())
    }

    /// Check every template against the placeholders available at its call site.
    pub fn validate(&self) -> Result<()> {
        for (key, allowed, required) in RULES {
            let text = self
                .template(key)
                .ok_or_else(|| SkgcError::Config(format!("Unknown prompt key: {}", key)))?;
            if text.trim().is_empty() {
                return Err(SkgcError::Config(format!("Prompt '{}' is empty", key)));
            }

            let used = placeholders(text)?;
            if let Some(unknown) = used.iter().find(|name| !allowed.contains(&name.as_str())) {
                return Err(SkgcError::Config(format!(
                    "Prompt '{}' uses unknown placeholder {{{}}}",
                    key, unknown
                )));
            }
            if let Some(absent) = required.iter().find(|name| !used.iter().any(|u| u == *name)) {
                return Err(SkgcError::Config(format!(
                    "Prompt '{}' must contain placeholder {{{}}}",
                    key, absent
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_set_is_valid() {
        PromptSet::default().validate().unwrap();
    }

    #[test]
    fn test_yaml_override_falls_back_to_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "self_review: \"Check again: {{expanded_keywords}}\"").unwrap();

        let set = PromptSet::load(file.path()).unwrap();
        assert_eq!(set.self_review, "Check again: {expanded_keywords}");
        assert_eq!(set.literal_extraction, extraction::LITERAL_EXTRACTION);
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let set = PromptSet {
            expanded_extraction: "{literal_keywords} {title}".to_string(),
            ..PromptSet::default()
        };
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("unknown placeholder {title}"));
    }

    #[test]
    fn test_required_placeholder_enforced() {
        let set = PromptSet {
            check_count: "Just a number please".to_string(),
            ..PromptSet::default()
        };
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("{agent_output}"));
    }

    #[test]
    fn test_yaml_dump_round_trips() {
        let yaml = PromptSet::default().to_yaml().unwrap();
        let parsed: PromptSet = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, PromptSet::default());
    }
}
