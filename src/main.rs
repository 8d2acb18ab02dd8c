//! rustskgc - Prompt-chained keyword extraction for scientific knowledge graphs
//!
//! Extracts research topics from publication metadata with a chain of
//! prompts, then scores them against a human gold standard and the CSO
//! classifier output.
//!
//! ## Usage
//!
//! ```bash
//! rustskgc run publications.json --mode training
//! rustskgc run publications.json --mode single --index 5 --no-baseline
//! rustskgc select publications.json --mode testing
//! rustskgc text --title "..." --abstract "..." --keywords ontology,search --gold ontology
//! rustskgc prompts > prompts.yaml
//! ```

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rustskgc::config::{self, LlmConfig};
use rustskgc::corpus::{Corpus, CorpusEntry, Publication, RunMode, CSO_OUTPUT, GOLD_STANDARD};
use rustskgc::evaluation::{EvaluationChain, EvaluationPlan, ExactPhraseMatcher, ModelPhraseMatcher, PhraseMatcher};
use rustskgc::extraction::ExtractionChain;
use rustskgc::llm::{ChatModel, OpenAiChat, Throttled, TokenUsage};
use rustskgc::pipeline::{Pipeline, PublicationStatus, RunReport};
use rustskgc::prompts::PromptSet;
use rustskgc::report::ReportWriter;
use rustskgc::validator::FormatValidator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Prompt-chained keyword extraction and evaluation
#[derive(Parser)]
#[command(name = "rustskgc")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and evaluate keywords for the selected publications
    Run(RunArgs),

    /// Extract and evaluate keywords for one publication given as text
    Text(TextArgs),

    /// Show which publications a mode selects, without calling the model
    Select {
        /// Input JSON file
        input: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Print a prompt set as YAML
    Prompts {
        /// Validate and print this file instead of the built-in set
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    All,
    Training,
    Testing,
    Single,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MatcherArg {
    /// The agent judges equivalent phrases
    Model,
    /// Case-insensitive exact matching, no model calls
    Exact,
}

#[derive(Args)]
struct SelectionArgs {
    /// Which records to process
    #[arg(long, value_enum, default_value = "all")]
    mode: ModeArg,

    /// 1-based record position for --mode single
    #[arg(long)]
    index: Option<usize>,
}

impl SelectionArgs {
    fn run_mode(&self) -> Result<RunMode> {
        match (self.mode, self.index) {
            (ModeArg::Single, Some(index)) => Ok(RunMode::Single(index)),
            (ModeArg::Single, None) => bail!("--mode single requires --index"),
            (_, Some(_)) => bail!("--index is only valid with --mode single"),
            (ModeArg::All, None) => Ok(RunMode::All),
            (ModeArg::Training, None) => Ok(RunMode::Training),
            (ModeArg::Testing, None) => Ok(RunMode::Testing),
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Input JSON file
    input: PathBuf,

    #[command(flatten)]
    selection: SelectionArgs,

    /// Reference sets to evaluate against (default: all)
    #[arg(long = "reference", value_parser = [GOLD_STANDARD, CSO_OUTPUT])]
    references: Vec<String>,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args)]
struct TextArgs {
    /// Publication title
    #[arg(long)]
    title: String,

    /// Publication abstract
    #[arg(long = "abstract")]
    abstract_text: String,

    /// Author keywords, comma-separated
    #[arg(long, value_delimiter = ',')]
    keywords: Vec<String>,

    /// Human expert keywords to score against, comma-separated
    #[arg(long, value_delimiter = ',')]
    gold: Option<Vec<String>>,

    /// CSO classifier keywords to score against, comma-separated
    #[arg(long, value_delimiter = ',')]
    cso: Option<Vec<String>>,

    #[command(flatten)]
    engine: EngineArgs,
}

/// Options shared by every command that calls the model
#[derive(Args)]
struct EngineArgs {
    /// Output directory
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// YAML file overriding the built-in prompts
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Skip scoring the CSO output against the gold standard
    #[arg(long)]
    no_baseline: bool,

    /// How equivalent phrases are judged
    #[arg(long, value_enum, default_value = "model")]
    matcher: MatcherArg,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct LlmArgs {
    /// API key for the agent role
    #[arg(long, env = "API_KEY_AGENT", hide_env_values = true)]
    agent_key: Option<String>,

    /// API key for the assistant role
    #[arg(long, env = "API_KEY_ASSISTANT", hide_env_values = true)]
    assistant_key: Option<String>,

    /// OpenAI organization id
    #[arg(long, env = "ORGANIZATION")]
    organization: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long, env = "LLM_BASE_URL", default_value = config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Chat model
    #[arg(long, default_value = config::DEFAULT_MODEL)]
    model: String,

    /// Seconds to wait before every model call
    #[arg(long, default_value = "10")]
    delay_secs: u64,

    /// Request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Assistant calls allowed per validated step
    #[arg(long, default_value = "3")]
    validation_attempts: usize,

    /// Retries after a 429 response before a call fails
    #[arg(long, default_value = "3")]
    rate_limit_retries: usize,

    /// Sampling seed sent with every request
    #[arg(long, default_value = "4")]
    seed: u64,
}

impl LlmArgs {
    fn to_config(&self) -> LlmConfig {
        LlmConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            agent_api_key: self.agent_key.clone().unwrap_or_default(),
            assistant_api_key: self.assistant_key.clone().unwrap_or_default(),
            organization: self.organization.clone(),
            request_delay: Duration::from_secs(self.delay_secs),
            request_timeout: Duration::from_secs(self.timeout_secs),
            seed: Some(self.seed),
            validation_attempts: self.validation_attempts,
            rate_limit_retries: self.rate_limit_retries,
            ..LlmConfig::default()
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Keys usually live in .env next to the corpus
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Text(args) => run_text(args).await,
        Commands::Select { input, selection } => show_selection(&input, &selection),
        Commands::Prompts { file } => print_prompts(file.as_deref()),
    }
}

// ============================================================================
// Run
// ============================================================================

async fn run_pipeline(args: RunArgs) -> Result<()> {
    let mode = args.selection.run_mode()?;
    let corpus = Corpus::load(&args.input)
        .with_context(|| format!("Failed to load corpus from {}", args.input.display()))?;
    let selected = corpus.select(mode).context("Invalid run mode")?;
    if selected.is_empty() {
        println!("No publications selected for mode {}.", mode);
        return Ok(());
    }

    let references = if args.references.is_empty() {
        vec![GOLD_STANDARD.to_string(), CSO_OUTPUT.to_string()]
    } else {
        args.references.clone()
    };
    let plan = EvaluationPlan::new(&references, !args.engine.no_baseline);

    execute(mode, &selected, plan, &args.engine).await
}

async fn run_text(args: TextArgs) -> Result<()> {
    let mut references = Vec::new();
    if let Some(gold) = args.gold {
        references.push((GOLD_STANDARD, gold));
    }
    if let Some(cso) = args.cso {
        references.push((CSO_OUTPUT, cso));
    }
    let publication = Publication::from_text(&args.title, &args.abstract_text, &args.keywords, references)
        .context("Invalid publication text")?;

    // Only the reference sets given on the command line are scored
    let plan = EvaluationPlan::new(&[GOLD_STANDARD.to_string(), CSO_OUTPUT.to_string()], !args.engine.no_baseline)
        .restricted_to(&publication);
    if plan.comparisons.is_empty() {
        println!("No reference keywords given, running extraction only.");
    }

    let corpus = Corpus::from_publication(publication);
    let selected = corpus.select(RunMode::Text).context("Invalid run mode")?;
    execute(RunMode::Text, &selected, plan, &args.engine).await
}

async fn execute(mode: RunMode, selected: &[&CorpusEntry], plan: EvaluationPlan, args: &EngineArgs) -> Result<()> {
    let config = args.llm.to_config();
    config.validate().context("Invalid model configuration")?;

    let prompts = match args.prompts {
        Some(ref path) => PromptSet::load(path)
            .with_context(|| format!("Failed to load prompts from {}", path.display()))?,
        None => PromptSet::default(),
    };
    let prompts = Arc::new(prompts);

    let started_at = Local::now();
    let writer = ReportWriter::create(&args.output, &started_at, mode).context("Failed to create output directory")?;
    println!("Output folder: {}", writer.folder().display());

    // Agent and assistant use separate keys, so separate clients
    let agent_client = Arc::new(OpenAiChat::new(&config, &config.agent_api_key)?);
    let assistant_client = Arc::new(OpenAiChat::new(&config, &config.assistant_api_key)?);
    let agent: Arc<dyn ChatModel> = Arc::new(Throttled::new(agent_client.clone(), config.request_delay));
    let assistant: Arc<dyn ChatModel> = Arc::new(Throttled::new(assistant_client.clone(), config.request_delay));

    let validator = Arc::new(FormatValidator::new(
        assistant,
        prompts.assistant_persona.as_str(),
        prompts.correction.as_str(),
        config.validation_attempts,
    ));

    let matcher: Arc<dyn PhraseMatcher> = match args.matcher {
        MatcherArg::Model => Arc::new(ModelPhraseMatcher::new(agent.clone(), validator.clone(), prompts.clone())),
        MatcherArg::Exact => Arc::new(ExactPhraseMatcher),
    };
    let matcher_name = match args.matcher {
        MatcherArg::Model => "model",
        MatcherArg::Exact => "exact",
    };

    info!(
        mode = %mode,
        publications = selected.len(),
        model = %config.model,
        comparisons = plan.comparisons.len(),
        "Starting run"
    );
    println!(
        "Processing {} publications ({} comparisons each, {}s between calls)...",
        selected.len(),
        plan.comparisons.len(),
        config.request_delay.as_secs()
    );

    let pipeline = Pipeline::new(
        ExtractionChain::new(agent, validator, prompts),
        EvaluationChain::new(matcher, plan),
    );
    let publications = pipeline.run(selected).await;

    let usage = add_usage(agent_client.usage(), assistant_client.usage());
    let report = RunReport::new(mode, started_at, &config.model, matcher_name, publications).with_token_usage(usage);

    println!("\n--- Summary ---");
    println!(
        "{} completed, {} partial, {} failed, {} rejected",
        report.count(PublicationStatus::Completed),
        report.count(PublicationStatus::Partial),
        report.count(PublicationStatus::Failed),
        report.count(PublicationStatus::Rejected),
    );
    for agg in &report.aggregates {
        println!("  {:<28} n={:<3} {}", agg.comparison, agg.publications, agg.mean);
    }
    if let Some(ref conclusion) = report.conclusion {
        println!("{}", conclusion);
    }
    println!("Tokens used: {}", report.token_usage.total_tokens);

    writer.write_all(&report).context("Failed to write run report")?;
    Ok(())
}

fn add_usage(a: TokenUsage, b: TokenUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: a.prompt_tokens + b.prompt_tokens,
        completion_tokens: a.completion_tokens + b.completion_tokens,
        total_tokens: a.total_tokens + b.total_tokens,
    }
}

// ============================================================================
// Select / Prompts
// ============================================================================

fn show_selection(input: &Path, selection: &SelectionArgs) -> Result<()> {
    let mode = selection.run_mode()?;
    let corpus =
        Corpus::load(input).with_context(|| format!("Failed to load corpus from {}", input.display()))?;
    let selected = corpus.select(mode).context("Invalid run mode")?;

    println!("Mode {} selects {} of {} records:", mode, selected.len(), corpus.len());
    for entry in selected {
        match entry.record {
            Ok(ref publication) => println!("{:>4}  {}  {}", entry.position, entry.id, publication.title),
            Err(ref reason) => println!("{:>4}  {}  [rejected: {}]", entry.position, entry.id, reason),
        }
    }
    Ok(())
}

fn print_prompts(file: Option<&Path>) -> Result<()> {
    let prompts = match file {
        Some(path) => {
            PromptSet::load(path).with_context(|| format!("Failed to load prompts from {}", path.display()))?
        }
        None => PromptSet::default(),
    };
    print!("{}", prompts.to_yaml()?);
    Ok(())
}
