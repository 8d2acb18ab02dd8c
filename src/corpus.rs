//! Publication corpus loading and run-mode selection.
//!
//! The input is a JSON object mapping record ids to publication data. File
//! order is preserved, so a mode always selects the same records from the
//! same file.

use crate::error::{Result, SkgcError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Range;
use std::path::Path;
use tracing::{info, warn};

/// Human expert annotation (`gold_standard.majority_vote`)
pub const GOLD_STANDARD: &str = "gold_standard";

/// CSO Classifier output (`cso_output.final`)
pub const CSO_OUTPUT: &str = "cso_output";

/// Record indices used by the training mode. The first two records are left
/// out so that a prompt set embedding corpus records 1 and 2 as worked
/// examples is never scored on them. The built-in examples are made up, so
/// with the built-in prompts the skip only keeps the split stable.
pub const TRAINING_RANGE: Range<usize> = 2..36;

/// Record indices used by the testing mode
pub const TESTING_RANGE: Range<usize> = 36..70;

/// A named reference keyword list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceKeywordSet {
    pub name: String,
    pub phrases: Vec<String>,
}

/// Publication metadata plus its reference sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub author_keywords: Vec<String>,
    pub references: Vec<ReferenceKeywordSet>,
}

/// Record id given to a publication typed on the command line
pub const TEXT_INPUT_ID: &str = "text";

impl Publication {
    /// Reference set by name
    pub fn reference(&self, name: &str) -> Option<&ReferenceKeywordSet> {
        self.references.iter().find(|r| r.name == name)
    }

    /// Build a publication from loose text fields.
    ///
    /// Only the reference sets given are attached. Phrases are trimmed and
    /// empty ones dropped. Title and abstract must not be blank.
    pub fn from_text(
        title: &str,
        abstract_text: &str,
        author_keywords: &[String],
        references: Vec<(&str, Vec<String>)>,
    ) -> Result<Self> {
        let title = title.trim();
        let abstract_text = abstract_text.trim();
        if title.is_empty() {
            return Err(input_error(TEXT_INPUT_ID, "title must not be empty"));
        }
        if abstract_text.is_empty() {
            return Err(input_error(TEXT_INPUT_ID, "abstract must not be empty"));
        }

        Ok(Self {
            id: TEXT_INPUT_ID.to_string(),
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            author_keywords: clean_phrases(author_keywords),
            references: references
                .into_iter()
                .map(|(name, phrases)| ReferenceKeywordSet {
                    name: name.to_string(),
                    phrases: clean_phrases(&phrases),
                })
                .collect(),
        })
    }
}

fn clean_phrases(phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// One input record in file order
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    /// 1-based position in the input file
    pub position: usize,
    pub id: String,
    /// The publication, or why the record was rejected
    pub record: std::result::Result<Publication, String>,
}

/// Which records a run processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "position")]
pub enum RunMode {
    /// Every record
    All,
    /// Records 3 to 36
    Training,
    /// Records 37 to 70
    Testing,
    /// One record by 1-based position
    Single(usize),
    /// A single publication given on the command line
    Text,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::All => write!(f, "all"),
            RunMode::Training => write!(f, "training"),
            RunMode::Testing => write!(f, "testing"),
            RunMode::Single(n) => write!(f, "single_{}", n),
            RunMode::Text => write!(f, "text"),
        }
    }
}

/// Parsed input file
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
}

impl Corpus {
    /// Load and parse an input file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let corpus = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            records = corpus.len(),
            rejected = corpus.rejected_count(),
            "Loaded publication corpus"
        );
        Ok(corpus)
    }

    /// A corpus holding just `publication`, at position 1.
    pub fn from_publication(publication: Publication) -> Self {
        Self {
            entries: vec![CorpusEntry {
                position: 1,
                id: publication.id.clone(),
                record: Ok(publication),
            }],
        }
    }

    /// Parse input JSON. Only a malformed document is an error; a bad
    /// record is kept as a rejected entry.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)?;
        let records = root
            .as_object()
            .ok_or_else(|| SkgcError::Parse("Input must be a JSON object keyed by record id".to_string()))?;

        let entries = records
            .iter()
            .enumerate()
            .map(|(idx, (id, value))| {
                let record = parse_record(id, value).map_err(|e| match e {
                    SkgcError::Input { reason, .. } => reason,
                    other => other.to_string(),
                });
                if let Err(ref reason) = record {
                    warn!(id = %id, reason = %reason, "Rejected input record");
                }
                CorpusEntry {
                    position: idx + 1,
                    id: id.clone(),
                    record,
                }
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rejected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.record.is_err()).count()
    }

    /// Records processed by `mode`, in file order.
    ///
    /// Ranges are clipped to the corpus size. An out-of-range single
    /// position is a config error.
    pub fn select(&self, mode: RunMode) -> Result<Vec<&CorpusEntry>> {
        let clip = |range: Range<usize>| {
            let end = range.end.min(self.entries.len());
            let start = range.start.min(end);
            start..end
        };

        let range = match mode {
            RunMode::All | RunMode::Text => 0..self.entries.len(),
            RunMode::Training => clip(TRAINING_RANGE),
            RunMode::Testing => clip(TESTING_RANGE),
            RunMode::Single(position) => {
                if position == 0 || position > self.entries.len() {
                    return Err(SkgcError::Config(format!(
                        "Publication position must be between 1 and {}, got {}",
                        self.entries.len(),
                        position
                    )));
                }
                position - 1..position
            }
        };

        Ok(self.entries[range].iter().collect())
    }
}

fn input_error(id: &str, reason: impl Into<String>) -> SkgcError {
    SkgcError::Input {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn string_field(id: &str, obj: &Map<String, Value>, key: &str) -> Result<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(_) => Err(input_error(id, format!("field '{}' must be a string", key))),
        None => Err(input_error(id, format!("missing field '{}'", key))),
    }
}

fn string_list(id: &str, value: Option<&Value>, path: &str) -> Result<Vec<String>> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(input_error(id, format!("field '{}' must be a list of strings", path))),
        None => return Err(input_error(id, format!("missing field '{}'", path))),
    };

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| input_error(id, format!("field '{}' must be a list of strings", path)))
        })
        .filter(|item| !matches!(item, Ok(s) if s.is_empty()))
        .collect()
}

fn parse_record(id: &str, value: &Value) -> Result<Publication> {
    let obj = value
        .as_object()
        .ok_or_else(|| input_error(id, "record must be a JSON object"))?;

    let title = string_field(id, obj, "title")?;
    let abstract_text = string_field(id, obj, "abstract")?;
    let author_keywords = string_list(id, obj.get("keywords"), "keywords")?;
    let cso_output = string_list(
        id,
        obj.get("cso_output").and_then(|v| v.get("final")),
        "cso_output.final",
    )?;
    let gold_standard = string_list(
        id,
        obj.get("gold_standard").and_then(|v| v.get("majority_vote")),
        "gold_standard.majority_vote",
    )?;

    Ok(Publication {
        id: id.to_string(),
        title,
        abstract_text,
        author_keywords,
        references: vec![
            ReferenceKeywordSet {
                name: GOLD_STANDARD.to_string(),
                phrases: gold_standard,
            },
            ReferenceKeywordSet {
                name: CSO_OUTPUT.to_string(),
                phrases: cso_output,
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(title: &str) -> Value {
        json!({
            "title": format!(" {} ", title),
            "abstract": "An abstract.",
            "keywords": ["ontology", " semantic web "],
            "cso_output": {"final": ["ontology", "world wide web"]},
            "gold_standard": {"majority_vote": ["ontology", "semantic web", "linked data"]},
            "doi": "ignored"
        })
    }

    fn corpus_of(n: usize) -> Corpus {
        let mut map = Map::new();
        // Ids chosen so that sorted order differs from file order
        for i in 0..n {
            map.insert(format!("id-{}", n - i), record(&format!("Paper {}", i + 1)));
        }
        Corpus::from_json_str(&Value::Object(map).to_string()).unwrap()
    }

    #[test]
    fn test_parse_record_fields() {
        let corpus = corpus_of(1);
        let publication = corpus.entries()[0].record.as_ref().unwrap();
        assert_eq!(publication.title, "Paper 1");
        assert_eq!(publication.author_keywords, vec!["ontology", "semantic web"]);
        assert_eq!(
            publication.reference(GOLD_STANDARD).unwrap().phrases,
            vec!["ontology", "semantic web", "linked data"]
        );
        assert_eq!(publication.reference(CSO_OUTPUT).unwrap().phrases.len(), 2);
    }

    #[test]
    fn test_missing_field_rejects_only_that_record() {
        let input = json!({
            "good": record("Good"),
            "bad": {"title": "No abstract", "keywords": [], "cso_output": {"final": []},
                    "gold_standard": {"majority_vote": []}},
            "typed": {"title": "T", "abstract": "A", "keywords": "not a list",
                      "cso_output": {"final": []}, "gold_standard": {"majority_vote": []}}
        });
        let corpus = Corpus::from_json_str(&input.to_string()).unwrap();

        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.rejected_count(), 2);
        assert!(corpus.entries()[0].record.is_ok());
        assert_eq!(corpus.entries()[1].record.as_ref().unwrap_err(), "missing field 'abstract'");
        assert_eq!(
            corpus.entries()[2].record.as_ref().unwrap_err(),
            "field 'keywords' must be a list of strings"
        );
    }

    #[test]
    fn test_missing_nested_reference_rejected() {
        let input = json!({"x": {"title": "T", "abstract": "A", "keywords": [], "cso_output": {}}});
        let corpus = Corpus::from_json_str(&input.to_string()).unwrap();
        assert_eq!(corpus.entries()[0].record.as_ref().unwrap_err(), "missing field 'cso_output.final'");
    }

    #[test]
    fn test_non_object_document_is_error() {
        assert!(Corpus::from_json_str("[1, 2]").is_err());
        assert!(Corpus::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_file_order_preserved() {
        let corpus = corpus_of(3);
        let ids: Vec<&str> = corpus.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["id-3", "id-2", "id-1"]);
        let positions: Vec<usize> = corpus.entries().iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_mode_ranges() {
        let corpus = corpus_of(80);
        let training = corpus.select(RunMode::Training).unwrap();
        assert_eq!(training.len(), 34);
        assert_eq!(training[0].position, 3);
        assert_eq!(training.last().unwrap().position, 36);

        let testing = corpus.select(RunMode::Testing).unwrap();
        assert_eq!(testing.len(), 34);
        assert_eq!(testing[0].position, 37);
        assert_eq!(testing.last().unwrap().position, 70);
        // Records 1 and 2 stay free for prompt sets that embed them as examples
        assert!(training.iter().chain(&testing).all(|e| e.position > 2));

        assert_eq!(corpus.select(RunMode::All).unwrap().len(), 80);
    }

    #[test]
    fn test_mode_ranges_clip_small_corpus() {
        let corpus = corpus_of(10);
        assert_eq!(corpus.select(RunMode::Training).unwrap().len(), 8);
        assert!(corpus.select(RunMode::Testing).unwrap().is_empty());
    }

    #[test]
    fn test_single_mode() {
        let corpus = corpus_of(5);
        let picked = corpus.select(RunMode::Single(2)).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "id-4");
        assert!(corpus.select(RunMode::Single(0)).is_err());
        assert!(corpus.select(RunMode::Single(6)).is_err());
    }

    #[test]
    fn test_selection_is_reproducible() {
        let a = corpus_of(50);
        let b = corpus_of(50);
        for mode in [RunMode::All, RunMode::Training, RunMode::Testing, RunMode::Single(7)] {
            let ids_a: Vec<&str> = a.select(mode).unwrap().iter().map(|e| e.id.as_str()).collect();
            let ids_b: Vec<&str> = b.select(mode).unwrap().iter().map(|e| e.id.as_str()).collect();
            assert_eq!(ids_a, ids_b, "mode {}", mode);
        }
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(RunMode::All.to_string(), "all");
        assert_eq!(RunMode::Single(4).to_string(), "single_4");
        assert_eq!(RunMode::Text.to_string(), "text");
    }

    #[test]
    fn test_publication_from_text() {
        let keywords = vec!["ontology".to_string(), "  ".to_string(), " search ".to_string()];
        let publication = Publication::from_text(
            " Ontology search ",
            "We search ontologies.",
            &keywords,
            vec![(GOLD_STANDARD, vec!["ontology".to_string(), "".to_string()])],
        )
        .unwrap();

        assert_eq!(publication.id, TEXT_INPUT_ID);
        assert_eq!(publication.title, "Ontology search");
        assert_eq!(publication.author_keywords, vec!["ontology", "search"]);
        assert_eq!(publication.reference(GOLD_STANDARD).unwrap().phrases, vec!["ontology"]);
        assert!(publication.reference(CSO_OUTPUT).is_none());

        assert!(Publication::from_text(" ", "A", &[], Vec::new()).is_err());
        assert!(Publication::from_text("T", "", &[], Vec::new()).is_err());
    }

    #[test]
    fn test_corpus_from_publication() {
        let publication = Publication::from_text("T", "A", &[], Vec::new()).unwrap();
        let corpus = Corpus::from_publication(publication);
        let selected = corpus.select(RunMode::Text).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].position, 1);
        assert_eq!(selected[0].id, TEXT_INPUT_ID);
        assert_eq!(corpus.rejected_count(), 0);
    }
}
