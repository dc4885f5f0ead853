//! # Filing Metrics
//!
//! A library for extracting validated, normalized financial metric series
//! from narrative PDF filings (annual reports, interims, quarterlies,
//! regulatory announcements).
//!
//! ## Core Concepts
//!
//! - **Blockification**: several PDF parser adapters decompose a filing into
//!   text and table blocks; their outputs are merged and deduplicated.
//! - **Sections**: contiguous page ranges classified as income statement,
//!   balance sheet, cash flow and so on, located by pattern matching.
//! - **Candidates**: tentative metric values extracted from table cells and
//!   narrative text, each carrying provenance and a confidence score.
//! - **Deterministic validation**: unit, range, year-over-year and arithmetic
//!   rules classify candidates as valid, needing review, or invalid.
//! - **Adjudication**: conflicting candidates for the same metric and period
//!   are resolved by an LLM, with a highest-confidence fallback.
//! - **Derived metrics**: growth rates and ratios computed over the
//!   adjudicated set.
//!
//! ## Example
//!
//! ```rust,no_run
//! use filing_metrics::{FinancialPipeline, PipelineConfig};
//! use std::path::Path;
//!
//! # async fn demo() {
//! let pipeline = FinancialPipeline::new(PipelineConfig::default());
//! let state = pipeline.run(Path::new("acme_annual_2023.pdf")).await;
//!
//! println!(
//!     "{} validated metrics, {} derived, {} errors",
//!     state.validated_metrics.len(),
//!     state.derived_metrics.len(),
//!     state.errors.len()
//! );
//! # }
//! ```

pub mod blockify;
pub mod candidates;
pub mod config;
pub mod currency;
pub mod derived;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod llm;
pub mod locator;
pub mod normalizer;
pub mod parsers;
pub mod periods;
pub mod pipeline;
pub mod schema;
pub mod validator;

pub use blockify::BlockificationService;
pub use candidates::{CandidateGenerator, NumericValueParser};
pub use config::PipelineConfig;
pub use currency::{CurrencyConverter, CurrencyDetector, ScaleConverter, ValueNormalizer};
pub use derived::DerivedMetricsComputer;
pub use error::{ExtractionError, Result};
pub use export::{Commentary, CsvWriter, ExportService, JsonWriter, MetricWriter};
pub use ingestion::IngestionService;
pub use llm::{LlmAdjudicator, LlmProvider, NullProvider};
pub use locator::{validate_sections, SectionLocator, SectionScorer};
pub use normalizer::MetricNormalizerService;
pub use periods::{LabelStandardizer, PeriodParser};
pub use pipeline::{AgentState, CancellationToken, FinancialPipeline, RunPhase};
pub use schema::*;
pub use validator::{DeterministicValidator, ValidationAggregator};

use std::path::Path;

/// Run the full pipeline over a filing with the given configuration.
pub async fn run_pipeline(pdf_path: &Path, config: PipelineConfig) -> AgentState {
    FinancialPipeline::new(config).run(pdf_path).await
}
