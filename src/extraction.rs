//! Three-stage topic extraction chain.
//!
//! `LiteralExtraction -> ExpandedExtraction -> SelfReview -> Done`, with
//! `Failed` reachable from every stage. Each agent answer is validated
//! before it is recorded and before it feeds the next stage.

use crate::corpus::Publication;
use crate::error::SkgcError;
use crate::llm::{AgentSession, ChatMessage, ChatModel};
use crate::prompts::{comma_list, fill, PromptSet};
use crate::validator::{FormatValidator, Shape};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extraction state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    LiteralExtraction,
    ExpandedExtraction,
    SelfReview,
    Done,
    Failed,
}

impl ExtractionStage {
    pub fn name(self) -> &'static str {
        match self {
            ExtractionStage::LiteralExtraction => "literal_extraction",
            ExtractionStage::ExpandedExtraction => "expanded_extraction",
            ExtractionStage::SelfReview => "self_review",
            ExtractionStage::Done => "done",
            ExtractionStage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExtractionStage::Done | ExtractionStage::Failed)
    }

    fn next(self) -> Self {
        match self {
            ExtractionStage::LiteralExtraction => ExtractionStage::ExpandedExtraction,
            ExtractionStage::ExpandedExtraction => ExtractionStage::SelfReview,
            ExtractionStage::SelfReview | ExtractionStage::Done => ExtractionStage::Done,
            ExtractionStage::Failed => ExtractionStage::Failed,
        }
    }
}

impl fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one stage sent and got back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: ExtractionStage,
    pub prompt: String,
    pub raw_response: String,
    /// Assistant-validated text, absent if validation failed
    pub validated: Option<String>,
    /// Phrases recorded for this stage
    pub keywords: Vec<String>,
    pub attempts: usize,
}

/// Why a chain or comparison stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    /// `transport`, `validation_exhausted`, ...
    pub kind: String,
    pub message: String,
}

impl StageFailure {
    pub fn from_error(stage: &str, error: &SkgcError) -> Self {
        Self {
            stage: stage.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        self.kind == "transport"
    }
}

/// Per-publication extraction progress and result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionState {
    pub publication_id: String,
    pub stage: ExtractionStage,
    pub records: Vec<StageRecord>,
    pub literal: Vec<String>,
    /// Literal list with the new phrases appended
    pub expanded: Vec<String>,
    /// Self-reviewed list, set only when `stage` is `Done`
    pub final_keywords: Vec<String>,
    /// Self-review phrases absent from the expanded list
    pub unsupported: Vec<String>,
    pub failure: Option<StageFailure>,
    /// Agent conversation with validated answers
    pub conversation: Vec<ChatMessage>,
}

impl ExtractionState {
    pub fn new(publication_id: &str) -> Self {
        Self {
            publication_id: publication_id.to_string(),
            stage: ExtractionStage::LiteralExtraction,
            records: Vec::new(),
            literal: Vec::new(),
            expanded: Vec::new(),
            final_keywords: Vec::new(),
            unsupported: Vec::new(),
            failure: None,
            conversation: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == ExtractionStage::Done
    }

    fn fail(&mut self, stage: ExtractionStage, error: &SkgcError) {
        warn!(
            publication = %self.publication_id,
            stage = %stage,
            error = %error,
            "Extraction chain failed"
        );
        self.failure = Some(StageFailure::from_error(stage.name(), error));
        self.stage = ExtractionStage::Failed;
    }
}

fn phrase_key(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}

/// `base` followed by every phrase of `additions` not already present,
/// compared case-insensitively.
pub fn append_new_phrases(base: &[String], additions: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = base.iter().map(|p| phrase_key(p)).collect();
    let mut merged = base.to_vec();
    for phrase in additions {
        if seen.insert(phrase_key(phrase)) {
            merged.push(phrase.clone());
        }
    }
    merged
}

/// Phrases of `list` that do not occur in `allowed` (case-insensitive)
pub fn phrases_not_in(list: &[String], allowed: &[String]) -> Vec<String> {
    let allowed: HashSet<String> = allowed.iter().map(|p| phrase_key(p)).collect();
    list.iter()
        .filter(|p| !allowed.contains(&phrase_key(p)))
        .cloned()
        .collect()
}

/// Runs the extraction state machine for one publication at a time.
pub struct ExtractionChain {
    agent: Arc<dyn ChatModel>,
    validator: Arc<FormatValidator>,
    prompts: Arc<PromptSet>,
}

impl ExtractionChain {
    pub fn new(agent: Arc<dyn ChatModel>, validator: Arc<FormatValidator>, prompts: Arc<PromptSet>) -> Self {
        Self {
            agent,
            validator,
            prompts,
        }
    }

    fn build_prompt(
        &self,
        stage: ExtractionStage,
        publication: &Publication,
        state: &ExtractionState,
    ) -> crate::error::Result<String> {
        match stage {
            ExtractionStage::LiteralExtraction => fill(
                &self.prompts.literal_extraction,
                &[
                    ("title", publication.title.as_str()),
                    ("keywords", comma_list(&publication.author_keywords).as_str()),
                    ("abstract", publication.abstract_text.as_str()),
                ],
            ),
            ExtractionStage::ExpandedExtraction => fill(
                &self.prompts.expanded_extraction,
                &[("literal_keywords", comma_list(&state.literal).as_str())],
            ),
            ExtractionStage::SelfReview => fill(
                &self.prompts.self_review,
                &[("expanded_keywords", comma_list(&state.expanded).as_str())],
            ),
            ExtractionStage::Done | ExtractionStage::Failed => Err(SkgcError::Config(format!(
                "No prompt for terminal stage {}",
                stage
            ))),
        }
    }

    /// Run all stages. Always returns the state; failures are recorded in it
    /// and leave it in [`ExtractionStage::Failed`].
    pub async fn run(&self, publication: &Publication) -> ExtractionState {
        let mut state = ExtractionState::new(&publication.id);
        let mut session = AgentSession::new(self.agent.clone(), &self.prompts.agent_persona);

        while !state.stage.is_terminal() {
            let stage = state.stage;
            info!(publication = %publication.id, stage = %stage, "Running extraction stage");

            let prompt = match self.build_prompt(stage, publication, &state) {
                Ok(p) => p,
                Err(e) => {
                    state.fail(stage, &e);
                    break;
                }
            };

            let raw_response = match session.ask(&prompt).await {
                Ok(r) => r,
                Err(e) => {
                    state.records.push(StageRecord {
                        stage,
                        prompt,
                        raw_response: String::new(),
                        validated: None,
                        keywords: Vec::new(),
                        attempts: 0,
                    });
                    state.fail(stage, &e);
                    break;
                }
            };

            let validated = self
                .validator
                .validate(
                    stage.name(),
                    &self.prompts.check_keyword_list,
                    &raw_response,
                    &Shape::KeywordList,
                    &[],
                )
                .await;

            let validated = match validated {
                Ok(v) => v,
                Err(e) => {
                    let attempts = match &e {
                        SkgcError::ValidationExhausted { attempts, .. } => *attempts,
                        _ => 0,
                    };
                    state.records.push(StageRecord {
                        stage,
                        prompt,
                        raw_response,
                        validated: None,
                        keywords: Vec::new(),
                        attempts,
                    });
                    state.fail(stage, &e);
                    break;
                }
            };

            session.record(&validated.text);
            let answer = validated.keywords().map(<[String]>::to_vec).unwrap_or_default();

            let recorded = match stage {
                ExtractionStage::LiteralExtraction => {
                    state.literal = answer;
                    state.literal.clone()
                }
                ExtractionStage::ExpandedExtraction => {
                    state.expanded = append_new_phrases(&state.literal, &answer);
                    state.expanded.clone()
                }
                _ => {
                    state.unsupported = phrases_not_in(&answer, &state.expanded);
                    if !state.unsupported.is_empty() {
                        warn!(
                            publication = %publication.id,
                            phrases = ?state.unsupported,
                            "Self-review introduced phrases absent from the expanded list"
                        );
                    }
                    state.final_keywords = answer;
                    state.final_keywords.clone()
                }
            };
            debug!(publication = %publication.id, stage = %stage, count = recorded.len(), "Stage recorded");

            state.records.push(StageRecord {
                stage,
                prompt,
                raw_response,
                validated: Some(validated.text),
                keywords: recorded,
                attempts: validated.attempts,
            });
            state.stage = stage.next();
        }

        state.conversation = session.into_history();
        if state.is_done() {
            info!(
                publication = %publication.id,
                keywords = state.final_keywords.len(),
                "Extraction complete"
            );
        }
        state
    }
}
