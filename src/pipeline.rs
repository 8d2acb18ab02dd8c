//! Sequential per-publication run.
//!
//! Each selected record goes through extraction and then evaluation. A
//! failure is contained to its publication: it is recorded in the report
//! and the run moves on.

use crate::corpus::{CorpusEntry, Publication, RunMode, CSO_OUTPUT, GOLD_STANDARD};
use crate::evaluation::{EvaluationChain, MatchResult, EXTRACTED};
use crate::extraction::{ExtractionChain, ExtractionState, StageFailure};
use crate::llm::TokenUsage;
use crate::metrics::{aggregate, conclusion, AggregateMetrics, Conclusion, Scores};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

/// Outcome of one publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    /// Every stage and comparison succeeded
    Completed,
    /// Some comparisons produced results, others failed
    Partial,
    /// Nothing was scored
    Failed,
    /// The input record was structurally invalid
    Rejected,
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublicationStatus::Completed => "completed",
            PublicationStatus::Partial => "partial",
            PublicationStatus::Failed => "failed",
            PublicationStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A match result with its scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    #[serde(flatten)]
    pub result: MatchResult,
    pub scores: Scores,
}

impl From<MatchResult> for ScoredMatch {
    fn from(result: MatchResult) -> Self {
        let scores = Scores::from_result(&result);
        Self { result, scores }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationReport {
    /// 1-based position in the input file
    pub position: usize,
    pub id: String,
    pub title: String,
    pub status: PublicationStatus,
    pub extraction: Option<ExtractionState>,
    pub matches: Vec<ScoredMatch>,
    pub failures: Vec<StageFailure>,
}

impl PublicationReport {
    fn rejected(entry: &CorpusEntry, reason: &str) -> Self {
        Self {
            position: entry.position,
            id: entry.id.clone(),
            title: String::new(),
            status: PublicationStatus::Rejected,
            extraction: None,
            matches: Vec::new(),
            failures: vec![StageFailure {
                stage: "input".to_string(),
                kind: "input".to_string(),
                message: reason.to_string(),
            }],
        }
    }

    pub fn find_match(&self, comparison: &str) -> Option<&ScoredMatch> {
        self.matches.iter().find(|m| m.result.comparison == comparison)
    }

    /// Extraction and baseline scores against the gold standard, when both exist.
    pub fn gold_standard_pair(&self) -> Option<(Scores, Scores)> {
        let extracted = self.find_match(&format!("{EXTRACTED}~{GOLD_STANDARD}"))?;
        let baseline = self.find_match(&format!("{CSO_OUTPUT}~{GOLD_STANDARD}"))?;
        Some((extracted.scores, baseline.scores))
    }
}

fn status_of(matches: &[ScoredMatch], failures: &[StageFailure]) -> PublicationStatus {
    match (matches.is_empty(), failures.is_empty()) {
        (_, true) => PublicationStatus::Completed,
        (false, false) => PublicationStatus::Partial,
        (true, false) => PublicationStatus::Failed,
    }
}

/// Extraction followed by evaluation, one publication at a time.
pub struct Pipeline {
    extraction: ExtractionChain,
    evaluation: EvaluationChain,
}

impl Pipeline {
    pub fn new(extraction: ExtractionChain, evaluation: EvaluationChain) -> Self {
        Self { extraction, evaluation }
    }

    /// Process one corpus entry. Never fails; problems end up in the report.
    pub async fn process(&self, entry: &CorpusEntry) -> PublicationReport {
        let publication = match &entry.record {
            Ok(p) => p,
            Err(reason) => {
                warn!(publication = %entry.id, reason = %reason, "Skipping rejected record");
                return PublicationReport::rejected(entry, reason);
            }
        };
        self.process_publication(entry.position, publication).await
    }

    async fn process_publication(&self, position: usize, publication: &Publication) -> PublicationReport {
        let extraction = self.extraction.run(publication).await;
        let mut failures: Vec<StageFailure> = extraction.failure.iter().cloned().collect();
        let mut matches = Vec::new();

        let transport_failed = extraction.failure.as_ref().is_some_and(StageFailure::is_transport);
        if transport_failed {
            error!(publication = %publication.id, "Model unreachable during extraction, skipping publication");
        } else {
            let outcome = self.evaluation.evaluate(publication, &extraction).await;
            if outcome.aborted {
                error!(publication = %publication.id, "Model unreachable during evaluation, skipping remaining comparisons");
            }
            matches = outcome.results.into_iter().map(ScoredMatch::from).collect();
            failures.extend(outcome.failures);
        }

        let status = status_of(&matches, &failures);
        info!(publication = %publication.id, status = %status, comparisons = matches.len(), "Publication processed");

        PublicationReport {
            position,
            id: publication.id.clone(),
            title: publication.title.clone(),
            status,
            extraction: Some(extraction),
            matches,
            failures,
        }
    }

    /// Process `entries` in order, reporting progress on stdout.
    pub async fn run(&self, entries: &[&CorpusEntry]) -> Vec<PublicationReport> {
        let total = entries.len();
        let mut reports = Vec::with_capacity(total);
        for (i, entry) in entries.iter().enumerate() {
            println!("\n--- Publication {}/{}: {} ---", i + 1, total, entry.id);
            let report = self.process(entry).await;
            println!("Status: {}", report.status);
            for m in &report.matches {
                println!("  {:<28} {}", m.result.comparison, m.scores);
            }
            reports.push(report);
        }
        reports
    }
}

/// Everything recorded about one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub started_at: DateTime<Local>,
    pub model: String,
    pub matcher: String,
    pub publications: Vec<PublicationReport>,
    pub aggregates: Vec<AggregateMetrics>,
    pub conclusion: Option<Conclusion>,
    pub token_usage: TokenUsage,
}

impl RunReport {
    /// Aggregate the per-publication scores into a run report.
    pub fn new(
        mode: RunMode,
        started_at: DateTime<Local>,
        model: &str,
        matcher: &str,
        publications: Vec<PublicationReport>,
    ) -> Self {
        let aggregates = aggregate(
            publications
                .iter()
                .flat_map(|p| p.matches.iter())
                .map(|m| (m.result.comparison.as_str(), m.scores)),
        );
        let conclusion = conclusion(publications.iter().filter_map(PublicationReport::gold_standard_pair));
        Self {
            mode,
            started_at,
            model: model.to_string(),
            matcher: matcher.to_string(),
            publications,
            aggregates,
            conclusion,
            token_usage: TokenUsage::default(),
        }
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = usage;
        self
    }

    pub fn count(&self, status: PublicationStatus) -> usize {
        self.publications.iter().filter(|p| p.status == status).count()
    }
}
