//! Full run with the built-in prompts and scripted models, down to the
//! report files.

use chrono::Local;
use rustskgc::corpus::{Corpus, Publication, RunMode, GOLD_STANDARD};
use rustskgc::evaluation::{EvaluationChain, EvaluationPlan, ModelPhraseMatcher};
use rustskgc::extraction::{ExtractionChain, ExtractionStage};
use rustskgc::llm::{ChatMessage, ScriptedModel};
use rustskgc::pipeline::{Pipeline, PublicationStatus, RunReport};
use rustskgc::prompts::PromptSet;
use rustskgc::report::{ReportWriter, METRICS_FILE, RESULTS_FILE, TRANSCRIPT_FILE};
use rustskgc::validator::FormatValidator;
use rustskgc::Result;
use std::sync::Arc;

const CORPUS: &str = r#"{
    "pub-1": {
        "title": "Ontology-driven search engines",
        "abstract": "We build search engines on top of ontologies.",
        "keywords": ["ontology", "search"],
        "cso_output": {"final": ["ontology", "search engines", "semantic web"]},
        "gold_standard": {"majority_vote": ["search engines", "ontology", "knowledge representation"]}
    },
    "pub-2": {
        "title": "Missing gold standard",
        "abstract": "Nothing to compare against.",
        "keywords": [],
        "cso_output": {"final": ["ontology"]}
    }
}"#;

/// Answers like a cooperative agent, keyed on the prompt it receives.
fn agent_reply(messages: &[ChatMessage]) -> Result<String> {
    let prompt = ChatMessage::last_user(messages);
    let reply = if prompt.starts_with("You are an expert") {
        "Keywords: ontology, search engines".to_string()
    } else if prompt.starts_with("Very good.") {
        "ontology, search engines, information retrieval".to_string()
    } else if prompt.starts_with("Please review") {
        "ontology, search engines, information retrieval".to_string()
    } else if prompt.starts_with("Now compare") {
        // Keep both labelled lines as given
        let lines: Vec<&str> = prompt.lines().collect();
        format!("{}\n{}", lines[2], lines[3])
    } else {
        "There are 2 matches.".to_string()
    };
    Ok(reply)
}

/// Strips everything but the answer being checked, as a careful assistant would.
fn assistant_reply(messages: &[ChatMessage]) -> Result<String> {
    let prompt = ChatMessage::last_user(messages);
    let answer = prompt
        .split("Answer of the other GPT:\n")
        .nth(1)
        .and_then(|rest| rest.split("\n\nAnswer").next())
        .unwrap_or_default();

    let cleaned = if let Some(list) = answer.strip_prefix("Keywords: ") {
        list.to_string()
    } else if answer.starts_with("There are") {
        answer.split_whitespace().nth(2).unwrap_or_default().to_string()
    } else {
        answer.to_string()
    };
    Ok(cleaned)
}

#[tokio::test]
async fn run_writes_complete_report() {
    let corpus = Corpus::from_json_str(CORPUS).unwrap();
    assert_eq!(corpus.rejected_count(), 1);
    let selected = corpus.select(RunMode::All).unwrap();

    let agent = Arc::new(ScriptedModel::from_fn(agent_reply));
    let assistant = Arc::new(ScriptedModel::from_fn(assistant_reply));
    let prompts = Arc::new(PromptSet::default());
    let validator = Arc::new(FormatValidator::new(
        assistant.clone(),
        prompts.assistant_persona.as_str(),
        prompts.correction.as_str(),
        3,
    ));

    let matcher = Arc::new(ModelPhraseMatcher::new(agent.clone(), validator.clone(), prompts.clone()));
    let pipeline = Pipeline::new(
        ExtractionChain::new(agent.clone(), validator, prompts),
        EvaluationChain::new(matcher, EvaluationPlan::default()),
    );

    let publications = pipeline.run(&selected).await;
    assert_eq!(publications.len(), 2);

    let first = &publications[0];
    assert_eq!(first.status, PublicationStatus::Completed, "{:?}", first.failures);
    let extraction = first.extraction.as_ref().unwrap();
    assert_eq!(extraction.stage, ExtractionStage::Done);
    assert_eq!(extraction.literal, vec!["ontology", "search engines"]);
    assert_eq!(extraction.final_keywords.len(), 3);
    assert!(extraction.unsupported.is_empty());
    assert_eq!(first.matches.len(), 3);
    for m in &first.matches {
        assert_eq!(m.result.matched, 2, "{}", m.result.comparison);
        assert!(m.scores.precision <= 1.0 && m.scores.recall <= 1.0);
    }

    assert_eq!(publications[1].status, PublicationStatus::Rejected);

    // Three extraction stages, then order and count for three comparisons
    assert_eq!(agent.call_count(), 9);
    assert_eq!(assistant.call_count(), 9);

    let report = RunReport::new(RunMode::All, Local::now(), "scripted", "model", publications);
    assert_eq!(report.aggregates.len(), 3);
    assert!(report.conclusion.is_some());

    let dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::create(dir.path(), &report.started_at, report.mode).unwrap();
    writer.write_all(&report).unwrap();

    let transcript = std::fs::read_to_string(writer.folder().join(TRANSCRIPT_FILE)).unwrap();
    assert!(transcript.contains("--- literal_extraction (attempts: 1) ---"));
    assert!(transcript.contains("--- order:extracted~gold_standard (attempts: 1) ---"));
    assert!(transcript.contains("missing field 'gold_standard.majority_vote'"));

    let metrics = std::fs::read_to_string(writer.folder().join(METRICS_FILE)).unwrap();
    assert_eq!(metrics.lines().count(), 4);

    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(writer.folder().join(RESULTS_FILE)).unwrap()).unwrap();
    assert_eq!(results["publications"].as_array().unwrap().len(), 2);
    assert_eq!(results["publications"][1]["status"], "rejected");
}

#[tokio::test]
async fn text_input_scores_only_the_given_reference_sets() {
    let publication = Publication::from_text(
        "Ontology-driven search engines",
        "We build search engines on top of ontologies.",
        &["ontology".to_string(), "search".to_string()],
        vec![(GOLD_STANDARD, vec!["search engines".to_string(), "ontology".to_string()])],
    )
    .unwrap();
    let plan = EvaluationPlan::default().restricted_to(&publication);
    let corpus = Corpus::from_publication(publication);
    let selected = corpus.select(RunMode::Text).unwrap();

    let agent = Arc::new(ScriptedModel::from_fn(agent_reply));
    let assistant = Arc::new(ScriptedModel::from_fn(assistant_reply));
    let prompts = Arc::new(PromptSet::default());
    let validator = Arc::new(FormatValidator::new(
        assistant.clone(),
        prompts.assistant_persona.as_str(),
        prompts.correction.as_str(),
        3,
    ));
    let matcher = Arc::new(ModelPhraseMatcher::new(agent.clone(), validator.clone(), prompts.clone()));
    let pipeline = Pipeline::new(
        ExtractionChain::new(agent.clone(), validator, prompts),
        EvaluationChain::new(matcher, plan),
    );

    let publications = pipeline.run(&selected).await;
    assert_eq!(publications.len(), 1);
    let report = &publications[0];
    assert_eq!(report.status, PublicationStatus::Completed, "{:?}", report.failures);
    assert!(report.failures.is_empty());
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].result.comparison, "extracted~gold_standard");
    assert_eq!(report.matches[0].result.matched, 2);

    // Three extraction stages, then order and count for one comparison
    assert_eq!(agent.call_count(), 5);

    let run = RunReport::new(RunMode::Text, Local::now(), "scripted", "model", publications);
    assert!(run.conclusion.is_none());
    let dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::create(dir.path(), &run.started_at, run.mode).unwrap();
    writer.write_all(&run).unwrap();
    assert!(writer.folder().to_string_lossy().ends_with("_text"));
}

#[test]
fn mode_selection_is_stable() {
    let records: Vec<String> = (1..=80)
        .map(|i| {
            format!(
                r#""p{i}": {{"title": "T{i}", "abstract": "A", "keywords": [],
                    "cso_output": {{"final": []}}, "gold_standard": {{"majority_vote": []}}}}"#
            )
        })
        .collect();
    let json = format!("{{{}}}", records.join(","));

    let first = Corpus::from_json_str(&json).unwrap();
    let second = Corpus::from_json_str(&json).unwrap();
    let ids = |c: &Corpus, mode| -> Vec<String> {
        c.select(mode).unwrap().iter().map(|e| e.id.clone()).collect()
    };

    let training = ids(&first, RunMode::Training);
    assert_eq!(training.len(), 34);
    assert_eq!(training[0], "p3");
    assert_eq!(training[33], "p36");
    assert_eq!(training, ids(&second, RunMode::Training));

    let testing = ids(&first, RunMode::Testing);
    assert_eq!(testing.first().map(String::as_str), Some("p37"));
    assert_eq!(testing.last().map(String::as_str), Some("p70"));
}
