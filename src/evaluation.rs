//! Evaluation of keyword lists against reference sets.
//!
//! Semantic matching is delegated to the model behind [`PhraseMatcher`]:
//! the agent orders both lists so that matching phrases line up at the
//! front, then counts the matches. [`ExactPhraseMatcher`] is a deterministic
//! stand-in for tests and offline scoring.

use crate::corpus::{Publication, CSO_OUTPUT, GOLD_STANDARD};
use crate::error::{Result, SkgcError};
use crate::extraction::{ExtractionState, StageFailure};
use crate::llm::{AgentSession, ChatModel};
use crate::prompts::{comma_list, fill, PromptSet};
use crate::validator::{FormatValidator, Shape, ShapeValue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Candidate name used for the extraction result
pub const EXTRACTED: &str = "extracted";

/// Where the candidate list of a comparison comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Final list of the extraction chain
    Extracted,
    /// A reference set of the publication, evaluated as a baseline
    Reference(String),
}

/// A candidate list scored against a reference set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub candidate: CandidateSource,
    pub reference: String,
}

impl Comparison {
    pub fn extracted(reference: &str) -> Self {
        Self {
            candidate: CandidateSource::Extracted,
            reference: reference.to_string(),
        }
    }

    pub fn baseline(candidate: &str, reference: &str) -> Self {
        Self {
            candidate: CandidateSource::Reference(candidate.to_string()),
            reference: reference.to_string(),
        }
    }

    pub fn candidate_name(&self) -> &str {
        match &self.candidate {
            CandidateSource::Extracted => EXTRACTED,
            CandidateSource::Reference(name) => name,
        }
    }

    /// `"<candidate>~<reference>"`
    pub fn label(&self) -> String {
        format!("{}~{}", self.candidate_name(), self.reference)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Label shown to the model for a list name
pub fn display_label(name: &str) -> String {
    match name {
        EXTRACTED => "Your result".to_string(),
        GOLD_STANDARD => "Human expert result".to_string(),
        CSO_OUTPUT => "CSO result".to_string(),
        other => other.replace('_', " "),
    }
}

/// Comparisons run for every selected publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPlan {
    pub comparisons: Vec<Comparison>,
}

impl EvaluationPlan {
    /// Extracted list against each of `references`; with `baseline`, the CSO
    /// output is additionally scored against the gold standard.
    pub fn new(references: &[String], baseline: bool) -> Self {
        let mut comparisons: Vec<Comparison> =
            references.iter().map(|r| Comparison::extracted(r)).collect();
        if baseline && references.iter().any(|r| r == GOLD_STANDARD) {
            comparisons.push(Comparison::baseline(CSO_OUTPUT, GOLD_STANDARD));
        }
        Self { comparisons }
    }

    /// Drop the comparisons that need a reference set `publication` lacks.
    pub fn restricted_to(self, publication: &Publication) -> Self {
        let comparisons = self
            .comparisons
            .into_iter()
            .filter(|c| {
                let candidate_present = match &c.candidate {
                    CandidateSource::Extracted => true,
                    CandidateSource::Reference(name) => publication.reference(name).is_some(),
                };
                candidate_present && publication.reference(&c.reference).is_some()
            })
            .collect();
        Self { comparisons }
    }
}

impl Default for EvaluationPlan {
    fn default() -> Self {
        Self::new(&[GOLD_STANDARD.to_string(), CSO_OUTPUT.to_string()], true)
    }
}

/// One model call made while comparing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub step: String,
    pub prompt: String,
    pub raw_response: String,
    pub validated: String,
    pub attempts: usize,
}

/// A phrase pair judged equivalent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub candidate: String,
    pub reference: String,
}

/// Outcome of one (publication, comparison)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub comparison: String,
    pub matched: usize,
    pub pairs: Vec<MatchedPair>,
    pub candidate_ordered: Vec<String>,
    pub reference_ordered: Vec<String>,
    /// Size of the candidate list as extracted/loaded
    pub candidate_len: usize,
    /// Size of the reference set as loaded
    pub reference_len: usize,
    pub exchanges: Vec<Exchange>,
}

/// Input to a matcher
#[derive(Debug, Clone, Copy)]
pub struct ComparisonRequest<'a> {
    pub label: &'a str,
    pub candidate_label: &'a str,
    pub reference_label: &'a str,
    pub candidate: &'a [String],
    pub reference: &'a [String],
}

impl ComparisonRequest<'_> {
    fn empty_result(&self) -> MatchResult {
        MatchResult {
            comparison: self.label.to_string(),
            matched: 0,
            pairs: Vec::new(),
            candidate_ordered: self.candidate.to_vec(),
            reference_ordered: self.reference.to_vec(),
            candidate_len: self.candidate.len(),
            reference_len: self.reference.len(),
            exchanges: Vec::new(),
        }
    }
}

/// Judges which phrases of two lists are equivalent.
#[async_trait]
pub trait PhraseMatcher: Send + Sync {
    async fn compare(&self, request: &ComparisonRequest<'_>) -> Result<MatchResult>;
}

/// Model-judged matching: order step, then count step.
pub struct ModelPhraseMatcher {
    agent: Arc<dyn ChatModel>,
    validator: Arc<FormatValidator>,
    prompts: Arc<PromptSet>,
}

impl ModelPhraseMatcher {
    pub fn new(agent: Arc<dyn ChatModel>, validator: Arc<FormatValidator>, prompts: Arc<PromptSet>) -> Self {
        Self {
            agent,
            validator,
            prompts,
        }
    }
}

#[async_trait]
impl PhraseMatcher for ModelPhraseMatcher {
    async fn compare(&self, request: &ComparisonRequest<'_>) -> Result<MatchResult> {
        if request.candidate.is_empty() || request.reference.is_empty() {
            return Ok(request.empty_result());
        }

        let mut session = AgentSession::new(self.agent.clone(), &self.prompts.agent_persona);
        let labels = [
            ("candidate_label", request.candidate_label),
            ("reference_label", request.reference_label),
        ];
        let mut exchanges = Vec::with_capacity(2);

        // Order step
        let step = format!("order:{}", request.label);
        let candidate_keywords = comma_list(request.candidate);
        let reference_keywords = comma_list(request.reference);
        let mut values = labels.to_vec();
        values.push(("candidate_keywords", candidate_keywords.as_str()));
        values.push(("reference_keywords", reference_keywords.as_str()));
        let prompt = fill(&self.prompts.order_lists, &values)?;

        let raw = session.ask(&prompt).await?;
        let shape = Shape::OrderedLists {
            candidate_label: request.candidate_label.to_string(),
            reference_label: request.reference_label.to_string(),
        };
        let ordered = self
            .validator
            .validate(&step, &self.prompts.check_ordered_lists, &raw, &shape, &labels)
            .await?;
        session.record(&ordered.text);

        let (candidate_ordered, reference_ordered) = match ordered.value.clone() {
            ShapeValue::OrderedLists { candidate, reference } => (candidate, reference),
            other => {
                return Err(SkgcError::Parse(format!(
                    "Unexpected validated value for {}: {:?}",
                    step, other
                )))
            }
        };
        exchanges.push(Exchange {
            step,
            prompt,
            raw_response: raw,
            validated: ordered.text,
            attempts: ordered.attempts,
        });

        // Count step
        let step = format!("count:{}", request.label);
        let candidate_text = comma_list(&candidate_ordered);
        let reference_text = comma_list(&reference_ordered);
        let mut values = labels.to_vec();
        values.push(("candidate_ordered", candidate_text.as_str()));
        values.push(("reference_ordered", reference_text.as_str()));
        let prompt = fill(&self.prompts.count_matches, &values)?;

        let raw = session.ask(&prompt).await?;
        let max = request
            .candidate
            .len()
            .min(request.reference.len())
            .min(candidate_ordered.len())
            .min(reference_ordered.len());
        let counted = self
            .validator
            .validate(&step, &self.prompts.check_count, &raw, &Shape::Count { max }, &[])
            .await?;
        session.record(&counted.text);

        let matched = match counted.value {
            ShapeValue::Count(n) => n,
            ref other => {
                return Err(SkgcError::Parse(format!(
                    "Unexpected validated value for {}: {:?}",
                    step, other
                )))
            }
        };
        exchanges.push(Exchange {
            step,
            prompt,
            raw_response: raw,
            validated: counted.text,
            attempts: counted.attempts,
        });

        let pairs = candidate_ordered
            .iter()
            .zip(reference_ordered.iter())
            .take(matched)
            .map(|(c, r)| MatchedPair {
                candidate: c.clone(),
                reference: r.clone(),
            })
            .collect();

        Ok(MatchResult {
            comparison: request.label.to_string(),
            matched,
            pairs,
            candidate_ordered,
            reference_ordered,
            candidate_len: request.candidate.len(),
            reference_len: request.reference.len(),
            exchanges,
        })
    }
}

/// Case-insensitive exact matching, no model calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactPhraseMatcher;

#[async_trait]
impl PhraseMatcher for ExactPhraseMatcher {
    async fn compare(&self, request: &ComparisonRequest<'_>) -> Result<MatchResult> {
        let key = |p: &str| p.trim().to_lowercase();
        let mut used = vec![false; request.reference.len()];
        let mut pairs = Vec::new();
        let mut unmatched_candidates = Vec::new();

        for phrase in request.candidate {
            let hit = request
                .reference
                .iter()
                .enumerate()
                .position(|(i, r)| !used[i] && key(r) == key(phrase));
            match hit {
                Some(i) => {
                    used[i] = true;
                    pairs.push(MatchedPair {
                        candidate: phrase.clone(),
                        reference: request.reference[i].clone(),
                    });
                }
                None => unmatched_candidates.push(phrase.clone()),
            }
        }

        let mut candidate_ordered: Vec<String> = pairs.iter().map(|p| p.candidate.clone()).collect();
        candidate_ordered.extend(unmatched_candidates);
        let mut reference_ordered: Vec<String> = pairs.iter().map(|p| p.reference.clone()).collect();
        reference_ordered.extend(
            request
                .reference
                .iter()
                .zip(used.iter())
                .filter(|(_, used)| !**used)
                .map(|(r, _)| r.clone()),
        );

        Ok(MatchResult {
            comparison: request.label.to_string(),
            matched: pairs.len(),
            pairs,
            candidate_ordered,
            reference_ordered,
            candidate_len: request.candidate.len(),
            reference_len: request.reference.len(),
            exchanges: Vec::new(),
        })
    }
}

/// Results of all comparisons for one publication
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationOutcome {
    pub results: Vec<MatchResult>,
    pub failures: Vec<StageFailure>,
    /// A transport error stopped the remaining comparisons
    pub aborted: bool,
}

/// Runs an [`EvaluationPlan`] for one publication.
pub struct EvaluationChain {
    matcher: Arc<dyn PhraseMatcher>,
    plan: EvaluationPlan,
}

impl EvaluationChain {
    pub fn new(matcher: Arc<dyn PhraseMatcher>, plan: EvaluationPlan) -> Self {
        Self { matcher, plan }
    }

    pub fn plan(&self) -> &EvaluationPlan {
        &self.plan
    }

    /// Run every planned comparison in order.
    ///
    /// Comparisons whose candidate is unavailable are recorded as failures
    /// and skipped. A transport error stops the publication.
    pub async fn evaluate(&self, publication: &Publication, extraction: &ExtractionState) -> EvaluationOutcome {
        let mut outcome = EvaluationOutcome::default();

        for comparison in &self.plan.comparisons {
            let label = comparison.label();
            let step = format!("evaluation:{}", label);

            let candidate: &[String] = match &comparison.candidate {
                CandidateSource::Extracted if extraction.is_done() => &extraction.final_keywords,
                CandidateSource::Extracted => {
                    outcome.failures.push(StageFailure {
                        stage: step,
                        kind: "skipped".to_string(),
                        message: "Extraction did not complete".to_string(),
                    });
                    continue;
                }
                CandidateSource::Reference(name) => match publication.reference(name) {
                    Some(set) => &set.phrases,
                    None => {
                        outcome.failures.push(StageFailure {
                            stage: step,
                            kind: "input".to_string(),
                            message: format!("Publication has no reference set '{}'", name),
                        });
                        continue;
                    }
                },
            };
            let reference = match publication.reference(&comparison.reference) {
                Some(set) => &set.phrases,
                None => {
                    outcome.failures.push(StageFailure {
                        stage: step,
                        kind: "input".to_string(),
                        message: format!("Publication has no reference set '{}'", comparison.reference),
                    });
                    continue;
                }
            };

            let candidate_label = display_label(comparison.candidate_name());
            let reference_label = display_label(&comparison.reference);
            let request = ComparisonRequest {
                label: &label,
                candidate_label: &candidate_label,
                reference_label: &reference_label,
                candidate,
                reference,
            };

            info!(publication = %publication.id, comparison = %label, "Running evaluation");
            match self.matcher.compare(&request).await {
                Ok(result) => outcome.results.push(result),
                Err(e) => {
                    warn!(publication = %publication.id, comparison = %label, error = %e, "Evaluation failed");
                    let transport = e.is_transport();
                    outcome.failures.push(StageFailure::from_error(&step, &e));
                    if transport {
                        outcome.aborted = true;
                        break;
                    }
                }
            }
        }

        outcome
    }
}
