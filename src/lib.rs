//! # rustskgc
//!
//! Prompt-chained research topic extraction for scientific knowledge graphs,
//! with evaluation against a human gold standard and the CSO classifier.
//!
//! ## Modules
//!
//! - [`corpus`] - Input loading and run mode selection
//! - [`prompts`] - Prompt templates and placeholder filling
//! - [`llm`] - Chat model client, throttle and agent sessions
//! - [`validator`] - Assistant format checks with bounded retries
//! - [`extraction`] - Literal, expanded and self-reviewed extraction
//! - [`evaluation`] - Model-judged phrase matching against reference sets
//! - [`metrics`] - Precision, recall, F1 and corpus means
//! - [`pipeline`] - Per-publication run with failure containment
//! - [`report`] - Transcript, JSON and CSV output
//! - [`config`] - Model settings
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustskgc::corpus::{Corpus, RunMode};
//!
//! fn main() -> anyhow::Result<()> {
//!     let corpus = Corpus::load(std::path::Path::new("publications.json"))?;
//!     let selected = corpus.select(RunMode::Training)?;
//!     println!("Selected {} publications", selected.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod corpus;
pub mod error;
pub mod evaluation;
pub mod extraction;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod validator;

pub use error::{Result, SkgcError};
