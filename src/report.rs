//! Run output: `transcript.txt`, `results.json` and `metrics.csv`.

use crate::corpus::{RunMode, CSO_OUTPUT, GOLD_STANDARD};
use crate::error::{Result, SkgcError};
use crate::evaluation::{display_label, EXTRACTED};
use crate::pipeline::{PublicationReport, PublicationStatus, RunReport};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use tracing::info;

pub const TRANSCRIPT_FILE: &str = "transcript.txt";
pub const RESULTS_FILE: &str = "results.json";
pub const METRICS_FILE: &str = "metrics.csv";

const COLUMN_WIDTH: usize = 40;
const TABLE_WIDTH: usize = COLUMN_WIDTH * 4;

/// One row of `metrics.csv`
#[derive(Debug, Serialize)]
struct MetricsRow<'a> {
    position: usize,
    publication: &'a str,
    comparison: &'a str,
    matched: usize,
    candidate_len: usize,
    reference_len: usize,
    precision: f64,
    recall: f64,
    f1: f64,
}

/// Writes the files of one run into a timestamped folder.
pub struct ReportWriter {
    folder: PathBuf,
}

impl ReportWriter {
    /// Create `<output_dir>/<YYYYmmdd_HHMMSS>_<mode>/`.
    pub fn create(output_dir: &Path, started_at: &DateTime<Local>, mode: RunMode) -> Result<Self> {
        let timestamp = started_at.format("%Y%m%d_%H%M%S").to_string();
        let folder = output_dir.join(format!("{}_{}", timestamp, mode));
        std::fs::create_dir_all(&folder)?;
        Ok(Self { folder })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn write_all(&self, report: &RunReport) -> Result<()> {
        self.write_transcript(report)?;
        self.write_json(report)?;
        self.write_metrics_csv(report)?;
        info!(folder = %self.folder.display(), "Run report written");
        Ok(())
    }

    pub fn write_transcript(&self, report: &RunReport) -> Result<()> {
        let path = self.folder.join(TRANSCRIPT_FILE);
        std::fs::write(&path, render_transcript(report)?)?;
        println!("Saved: {:?}", path);
        Ok(())
    }

    pub fn write_json(&self, report: &RunReport) -> Result<()> {
        let path = self.folder.join(RESULTS_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
        println!("Saved: {:?}", path);
        Ok(())
    }

    /// One row per (publication, comparison). Headers are written even for
    /// an empty run.
    pub fn write_metrics_csv(&self, report: &RunReport) -> Result<()> {
        let path = self.folder.join(METRICS_FILE);
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(&path)?;
        wtr.write_record([
            "position",
            "publication",
            "comparison",
            "matched",
            "candidate_len",
            "reference_len",
            "precision",
            "recall",
            "f1",
        ])?;

        for publication in &report.publications {
            for m in &publication.matches {
                wtr.serialize(MetricsRow {
                    position: publication.position,
                    publication: &publication.id,
                    comparison: &m.result.comparison,
                    matched: m.result.matched,
                    candidate_len: m.result.candidate_len,
                    reference_len: m.result.reference_len,
                    precision: m.scores.precision,
                    recall: m.scores.recall,
                    f1: m.scores.f1,
                })?;
            }
        }

        wtr.flush()?;
        println!("Saved: {:?}", path);
        Ok(())
    }
}

/// Human-readable account of the whole run.
pub fn render_transcript(report: &RunReport) -> Result<String> {
    let mut out = String::new();
    write_transcript(&mut out, report).map_err(|e| SkgcError::Parse(format!("Failed to render transcript: {}", e)))?;
    Ok(out)
}

fn write_transcript(out: &mut String, report: &RunReport) -> fmt::Result {
    writeln!(out, "Run mode: {}", report.mode)?;
    writeln!(out, "Started: {}", report.started_at.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out, "Model: {}", report.model)?;
    writeln!(out, "Matcher: {}", report.matcher)?;

    for publication in &report.publications {
        write_publication(out, publication)?;
    }

    writeln!(out)?;
    writeln!(out, "{}", "=".repeat(TABLE_WIDTH))?;
    writeln!(out, "Corpus summary")?;
    writeln!(out, "{}", "-".repeat(TABLE_WIDTH))?;
    writeln!(
        out,
        "{:<40}{:>12}{:>12}{:>12}{:>12}",
        "comparison", "publications", "precision", "recall", "f1"
    )?;
    for agg in &report.aggregates {
        writeln!(
            out,
            "{:<40}{:>12}{:>12.3}{:>12.3}{:>12.3}",
            agg.comparison, agg.publications, agg.mean.precision, agg.mean.recall, agg.mean.f1
        )?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "Publications: {} total, {} completed, {} partial, {} failed, {} rejected",
        report.publications.len(),
        report.count(PublicationStatus::Completed),
        report.count(PublicationStatus::Partial),
        report.count(PublicationStatus::Failed),
        report.count(PublicationStatus::Rejected),
    )?;
    writeln!(
        out,
        "Tokens: {} prompt, {} completion, {} total",
        report.token_usage.prompt_tokens, report.token_usage.completion_tokens, report.token_usage.total_tokens
    )?;
    if let Some(ref conclusion) = report.conclusion {
        writeln!(out, "{}", conclusion)?;
    }
    Ok(())
}

fn write_block(out: &mut String, heading: &str, body: &str) -> fmt::Result {
    writeln!(out, "{}:", heading)?;
    writeln!(out, "{}", if body.is_empty() { "(empty)" } else { body })
}

fn write_publication(out: &mut String, publication: &PublicationReport) -> fmt::Result {
    writeln!(out)?;
    writeln!(out, "{}", "=".repeat(TABLE_WIDTH))?;
    writeln!(out, "Publication {}: {}", publication.position, publication.id)?;
    if !publication.title.is_empty() {
        writeln!(out, "Title: {}", publication.title)?;
    }
    writeln!(out, "Status: {}", publication.status)?;

    if let Some(ref extraction) = publication.extraction {
        for record in &extraction.records {
            writeln!(out)?;
            writeln!(out, "--- {} (attempts: {}) ---", record.stage, record.attempts)?;
            write_block(out, "Prompt", &record.prompt)?;
            write_block(out, "Raw output", &record.raw_response)?;
            write_block(out, "Validated output", record.validated.as_deref().unwrap_or("(rejected)"))?;
        }
        if !extraction.unsupported.is_empty() {
            writeln!(out)?;
            writeln!(
                out,
                "Self-review phrases not in the expanded list: {}",
                extraction.unsupported.join(", ")
            )?;
        }
    }

    for m in &publication.matches {
        for exchange in &m.result.exchanges {
            writeln!(out)?;
            writeln!(out, "--- {} (attempts: {}) ---", exchange.step, exchange.attempts)?;
            write_block(out, "Prompt", &exchange.prompt)?;
            write_block(out, "Raw output", &exchange.raw_response)?;
            write_block(out, "Validated output", &exchange.validated)?;
        }
    }

    if !publication.matches.is_empty() {
        writeln!(out)?;
        write_comparison_table(out, publication)?;
        writeln!(out)?;
        for m in &publication.matches {
            writeln!(
                out,
                "{}: {} matched ({} vs {} phrases) {}",
                m.result.comparison, m.result.matched, m.result.candidate_len, m.result.reference_len, m.scores
            )?;
        }
    }

    if !publication.failures.is_empty() {
        writeln!(out)?;
        writeln!(out, "Failures:")?;
        for failure in &publication.failures {
            writeln!(out, "  - [{}] {}: {}", failure.stage, failure.kind, failure.message)?;
        }
    }
    Ok(())
}

fn cell(text: &str) -> String {
    let max = COLUMN_WIDTH - 2;
    if text.chars().count() > max {
        let cut: String = text.chars().take(max - 3).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Extracted list, gold standard in both orders, and the CSO list, side by
/// side. Columns without a result are left blank.
fn write_comparison_table(out: &mut String, publication: &PublicationReport) -> fmt::Result {
    let extracted_gold = publication.find_match(&format!("{}~{}", EXTRACTED, GOLD_STANDARD));
    let cso_gold = publication.find_match(&format!("{}~{}", CSO_OUTPUT, GOLD_STANDARD));
    let extracted_cso = publication.find_match(&format!("{}~{}", EXTRACTED, CSO_OUTPUT));

    let empty: &[String] = &[];
    let extracted = extracted_gold
        .or(extracted_cso)
        .map_or(empty, |m| m.result.candidate_ordered.as_slice());
    let gold_first = extracted_gold.map_or(empty, |m| m.result.reference_ordered.as_slice());
    let gold_second = cso_gold.map_or(empty, |m| m.result.reference_ordered.as_slice());
    let cso = cso_gold
        .map(|m| m.result.candidate_ordered.as_slice())
        .or(extracted_cso.map(|m| m.result.reference_ordered.as_slice()))
        .unwrap_or(empty);

    let gold = display_label(GOLD_STANDARD);
    let headers = [
        display_label(EXTRACTED),
        format!("{} (order 1)", gold),
        format!("{} (order 2)", gold),
        display_label(CSO_OUTPUT),
    ];
    let columns = [extracted, gold_first, gold_second, cso];

    for header in &headers {
        write!(out, "{:<width$}", cell(header), width = COLUMN_WIDTH)?;
    }
    writeln!(out)?;
    writeln!(out, "{}", "-".repeat(TABLE_WIDTH))?;

    let rows = columns.iter().map(|c| c.len()).max().unwrap_or(0);
    for row in 0..rows {
        let line: String = columns
            .iter()
            .map(|c| format!("{:<width$}", cell(c.get(row).map(String::as_str).unwrap_or("")), width = COLUMN_WIDTH))
            .collect();
        writeln!(out, "{}", line.trim_end())?;
    }
    writeln!(out, "{}", "-".repeat(TABLE_WIDTH))
}
