//! Precision, recall and F1 per comparison, and corpus means.

use crate::evaluation::MatchResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scores of one (publication, comparison)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Scores {
    /// Degenerate denominators give 0 instead of NaN.
    pub fn from_counts(matched: usize, candidate_len: usize, reference_len: usize) -> Self {
        let ratio = |n: usize, d: usize| if d == 0 { 0.0 } else { n as f64 / d as f64 };
        let precision = ratio(matched, candidate_len);
        let recall = ratio(matched, reference_len);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self { precision, recall, f1 }
    }

    pub fn from_result(result: &MatchResult) -> Self {
        Self::from_counts(result.matched, result.candidate_len, result.reference_len)
    }
}

impl fmt::Display for Scores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P={:.3} R={:.3} F1={:.3}",
            self.precision, self.recall, self.f1
        )
    }
}

/// Corpus mean for one comparison label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub comparison: String,
    /// Publications that produced a result for this comparison
    pub publications: usize,
    pub mean: Scores,
}

/// Arithmetic mean per comparison label, sorted by label.
pub fn aggregate<'a, I>(scored: I) -> Vec<AggregateMetrics>
where
    I: IntoIterator<Item = (&'a str, Scores)>,
{
    let mut groups: BTreeMap<&str, Vec<Scores>> = BTreeMap::new();
    for (label, scores) in scored {
        groups.entry(label).or_default().push(scores);
    }

    groups
        .into_iter()
        .map(|(label, scores)| AggregateMetrics {
            comparison: label.to_string(),
            publications: scores.len(),
            mean: mean(&scores),
        })
        .collect()
}

fn mean(scores: &[Scores]) -> Scores {
    if scores.is_empty() {
        return Scores::default();
    }
    let n = scores.len() as f64;
    Scores {
        precision: scores.iter().map(|s| s.precision).sum::<f64>() / n,
        recall: scores.iter().map(|s| s.recall).sum::<f64>() / n,
        f1: scores.iter().map(|s| s.f1).sum::<f64>() / n,
    }
}

/// Which approach scored the higher mean F1 against the gold standard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conclusion {
    /// Publications scored by both approaches; both means cover exactly these
    pub publications: usize,
    pub extracted_f1: f64,
    pub baseline_f1: f64,
    pub winner: Winner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Extraction,
    Baseline,
    Tie,
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.winner {
            Winner::Extraction => write!(
                f,
                "The prompt-chained extraction performs better than the CSO classifier (mean F1 {:.3} vs {:.3} over {} publications).",
                self.extracted_f1, self.baseline_f1, self.publications
            ),
            Winner::Baseline => write!(
                f,
                "The CSO classifier performs better than the prompt-chained extraction (mean F1 {:.3} vs {:.3} over {} publications).",
                self.baseline_f1, self.extracted_f1, self.publications
            ),
            Winner::Tie => write!(
                f,
                "The prompt-chained extraction and the CSO classifier perform equally well (mean F1 {:.3} over {} publications).",
                self.extracted_f1, self.publications
            ),
        }
    }
}

/// Compare the extraction with the baseline on gold-standard scores.
///
/// Each item pairs the `extracted~gold_standard` and baseline scores of one
/// publication, so both means run over the same publications. `None` when
/// no publication has both.
pub fn conclusion<I>(paired: I) -> Option<Conclusion>
where
    I: IntoIterator<Item = (Scores, Scores)>,
{
    let (extracted, baseline): (Vec<Scores>, Vec<Scores>) = paired.into_iter().unzip();
    if extracted.is_empty() {
        return None;
    }
    let extracted_f1 = mean(&extracted).f1;
    let baseline_f1 = mean(&baseline).f1;

    let winner = if (extracted_f1 - baseline_f1).abs() < 1e-9 {
        Winner::Tie
    } else if extracted_f1 > baseline_f1 {
        Winner::Extraction
    } else {
        Winner::Baseline
    };
    Some(Conclusion {
        publications: extracted.len(),
        extracted_f1,
        baseline_f1,
        winner,
    })
}
