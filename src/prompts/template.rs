//! Placeholder substitution for prompt templates.
//!
//! Placeholders are `{name}` tokens where `name` is an identifier
//! (`[A-Za-z_][A-Za-z0-9_]*`). Substitution is a single pass: replacement
//! text is never re-scanned, so values may safely contain braces.

use crate::error::{Result, SkgcError};
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};

const PLACEHOLDER_PATTERN: &str = r"\{([A-Za-z_][A-Za-z0-9_]*)\}";

fn placeholder_regex() -> Result<Regex> {
    Regex::new(PLACEHOLDER_PATTERN).map_err(|e| SkgcError::Parse(e.to_string()))
}

/// Fill `template` with `values`.
///
/// Fails with [`SkgcError::MissingPlaceholder`] listing every placeholder
/// that has no value. Values not referenced by the template are ignored.
pub fn fill(template: &str, values: &[(&str, &str)]) -> Result<String> {
    let lookup: HashMap<&str, &str> = values.iter().copied().collect();
    let re = placeholder_regex()?;

    let missing: BTreeSet<String> = re
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|name| !lookup.contains_key(name))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(SkgcError::MissingPlaceholder(missing.into_iter().collect()));
    }

    let filled = re.replace_all(template, |caps: &Captures| {
        caps.get(1)
            .and_then(|m| lookup.get(m.as_str()))
            .copied()
            .unwrap_or_default()
            .to_string()
    });
    Ok(filled.into_owned())
}

/// Distinct placeholder names used by `template`, sorted.
pub fn placeholders(template: &str) -> Result<Vec<String>> {
    let re = placeholder_regex()?;
    let names: BTreeSet<String> = re
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    Ok(names.into_iter().collect())
}

/// Join phrases into the comma-separated form used inside prompts.
pub fn comma_list(phrases: &[String]) -> String {
    phrases.join(", ")
}
