//! Model-mediated format validation.
//!
//! The agent's free text goes to a second, stateless assistant conversation
//! whose only job is to return it in a strict shape. The normalised reply is
//! checked structurally; a rejected reply is sent back with the reason until
//! the attempt budget runs out.

use crate::error::{Result, SkgcError};
use crate::llm::{ChatMessage, ChatModel};
use crate::prompts::fill;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest phrase still accepted as a keyword
pub const MAX_WORDS_PER_PHRASE: usize = 8;

/// Expected structure of a validated answer
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Single-line comma-separated keyword list
    KeywordList,
    /// Two labelled keyword lists, one per line
    OrderedLists {
        candidate_label: String,
        reference_label: String,
    },
    /// A bare non-negative integer no larger than `max`
    Count { max: usize },
}

/// Parsed content of an accepted answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeValue {
    Keywords(Vec<String>),
    OrderedLists {
        candidate: Vec<String>,
        reference: Vec<String>,
    },
    Count(usize),
}

/// An answer that passed the structural check
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// Normalised assistant output
    pub text: String,
    pub value: ShapeValue,
    /// Assistant calls used, 1-based
    pub attempts: usize,
}

impl Validated {
    pub fn keywords(&self) -> Option<&[String]> {
        match &self.value {
            ShapeValue::Keywords(k) => Some(k),
            _ => None,
        }
    }
}

/// Runs the assistant check with a bounded retry loop.
pub struct FormatValidator {
    model: Arc<dyn ChatModel>,
    persona: String,
    correction_template: String,
    max_attempts: usize,
}

impl FormatValidator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        persona: impl Into<String>,
        correction_template: impl Into<String>,
        max_attempts: usize,
    ) -> Self {
        Self {
            model,
            persona: persona.into(),
            correction_template: correction_template.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Coerce `agent_output` into `shape`.
    ///
    /// `check_template` receives `{agent_output}` plus `extra_values`.
    /// Returns [`SkgcError::ValidationExhausted`] after `max_attempts`
    /// rejected replies; transport errors are returned unchanged.
    pub async fn validate(
        &self,
        step: &str,
        check_template: &str,
        agent_output: &str,
        shape: &Shape,
        extra_values: &[(&str, &str)],
    ) -> Result<Validated> {
        let mut values: Vec<(&str, &str)> = vec![("agent_output", agent_output)];
        values.extend_from_slice(extra_values);
        let check_prompt = fill(check_template, &values)?;

        let mut messages = vec![
            ChatMessage::system(self.persona.as_str()),
            ChatMessage::user(check_prompt),
        ];
        let mut last_output = String::new();
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let correction = fill(
                    &self.correction_template,
                    &[
                        ("agent_output", agent_output),
                        ("rejected_output", last_output.as_str()),
                        ("rejection_reason", last_reason.as_str()),
                    ],
                )?;
                messages.push(ChatMessage::assistant(last_output.as_str()));
                messages.push(ChatMessage::user(correction));
            }

            let reply = self.model.chat(&messages).await?;
            let normalized = normalize(&reply);

            match check(shape, &normalized) {
                Ok(value) => {
                    debug!(step, attempt, "Format check passed");
                    return Ok(Validated {
                        text: normalized,
                        value,
                        attempts: attempt,
                    });
                }
                Err(reason) => {
                    warn!(step, attempt, reason = %reason, "Format check rejected assistant output");
                    last_output = normalized;
                    last_reason = reason;
                }
            }
        }

        Err(SkgcError::ValidationExhausted {
            step: step.to_string(),
            attempts: self.max_attempts,
            reason: last_reason,
            last_output,
        })
    }
}

/// Strip wrapping that models commonly add around an otherwise valid answer.
pub fn normalize(content: &str) -> String {
    let mut text = content.trim();

    // Markdown code block, inline or fenced over several lines
    if text.starts_with("```") && !text.contains('\n') {
        return normalize(text.trim_start_matches('`').trim_end_matches('`'));
    }
    if text.starts_with("```") {
        let lines: Vec<&str> = text.lines().collect();
        let end = if lines.len() > 1 && lines.last().map(|l| l.trim()) == Some("```") {
            lines.len() - 1
        } else {
            lines.len()
        };
        return normalize(&lines[1.min(end)..end].join("\n"));
    }

    for quote in ['"', '\'', '`'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim();
        }
    }

    let text = text.strip_suffix('.').unwrap_or(text);
    let text = text.strip_suffix(',').unwrap_or(text);
    text.trim().to_string()
}

/// Apply the structural check for `shape` to normalised text.
pub fn check(shape: &Shape, text: &str) -> std::result::Result<ShapeValue, String> {
    match shape {
        Shape::KeywordList => parse_keyword_list(text).map(ShapeValue::Keywords),
        Shape::OrderedLists {
            candidate_label,
            reference_label,
        } => parse_ordered_lists(text, candidate_label, reference_label)
            .map(|(candidate, reference)| ShapeValue::OrderedLists { candidate, reference }),
        Shape::Count { max } => parse_count(text, *max).map(ShapeValue::Count),
    }
}

/// Parse a single-line comma-separated keyword list.
pub fn parse_keyword_list(text: &str) -> std::result::Result<Vec<String>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("answer is empty".to_string());
    }
    if text.contains('\n') {
        return Err("answer spans several lines; expected one comma-separated line".to_string());
    }

    let mut phrases = Vec::new();
    for raw in text.split(',') {
        let phrase = raw.trim();
        if phrase.is_empty() {
            return Err("empty keyword between commas".to_string());
        }
        if phrase.contains(':') {
            return Err(format!("explanatory text in '{}'", phrase));
        }
        if phrase.starts_with('-') || phrase.starts_with('*') || phrase.starts_with('#') {
            return Err(format!("list markup in '{}'", phrase));
        }
        if phrase.ends_with(|c: char| matches!(c, '.' | '!' | '?')) {
            return Err(format!("sentence punctuation in '{}'", phrase));
        }
        if phrase.split_whitespace().count() > MAX_WORDS_PER_PHRASE {
            return Err(format!("'{}' is a sentence, not a keyword", phrase));
        }
        phrases.push(phrase.to_string());
    }
    Ok(phrases)
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let tag_len = label.len() + 1;
    let head = line.get(..tag_len)?;
    let tag = format!("{}:", label);
    if head.eq_ignore_ascii_case(&tag) {
        line.get(tag_len..).map(str::trim)
    } else {
        None
    }
}

/// Parse two labelled keyword lists, one per line.
pub fn parse_ordered_lists(
    text: &str,
    candidate_label: &str,
    reference_label: &str,
) -> std::result::Result<(Vec<String>, Vec<String>), String> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() != 2 {
        return Err(format!("expected 2 labelled lines, found {}", lines.len()));
    }

    let candidate = strip_label(lines[0], candidate_label)
        .ok_or_else(|| format!("first line must start with '{}:'", candidate_label))?;
    let reference = strip_label(lines[1], reference_label)
        .ok_or_else(|| format!("second line must start with '{}:'", reference_label))?;

    let candidate = parse_keyword_list(candidate).map_err(|e| format!("{}: {}", candidate_label, e))?;
    let reference = parse_keyword_list(reference).map_err(|e| format!("{}: {}", reference_label, e))?;
    Ok((candidate, reference))
}

/// Parse a bare match count bounded by `max`.
pub fn parse_count(text: &str, max: usize) -> std::result::Result<usize, String> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("'{}' is not a bare number", text));
    }
    let count: usize = text
        .parse()
        .map_err(|e| format!("'{}' is not a valid count: {}", text, e))?;
    if count > max {
        return Err(format!("count {} exceeds the shorter list length {}", count, max));
    }
    Ok(count)
}
