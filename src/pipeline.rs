use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::blockify::BlockificationService;
use crate::candidates::CandidateGenerator;
use crate::config::PipelineConfig;
use crate::derived::DerivedMetricsComputer;
use crate::error::ExtractionError;
use crate::export::{Commentary, ExportService};
use crate::ingestion::IngestionService;
use crate::llm::{select_highest_confidence, LlmAdjudicator, LlmProvider, NullProvider};
use crate::locator::{validate_sections, SectionLocator};
use crate::normalizer::MetricNormalizerService;
use crate::schema::{
    CandidateValue, DocumentMetadata, FinancialMetric, Section, SectionType, TableBlock, TextBlock,
    ValidationResult,
};
use crate::validator::{DeterministicValidator, ValidationAggregator};

/// A stage failure recorded on the run, never fatal past ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct StageError {
    pub stage: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Run-level progress through the stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Ingested,
    Blockified,
    Located,
    CandidatesGenerated,
    Validated,
    Adjudicated,
    Skipped,
    Derived,
    Done,
}

/// Accumulating state threaded through the pipeline. Each stage owns exactly
/// one output slot plus the shared error list and timing map.
#[derive(Debug)]
pub struct AgentState {
    pub pdf_path: PathBuf,
    pub document_metadata: Option<DocumentMetadata>,
    pub text_blocks: Vec<TextBlock>,
    pub table_blocks: Vec<TableBlock>,
    pub sections: Vec<Section>,
    pub missing_sections: Vec<SectionType>,
    pub candidates: Vec<CandidateValue>,
    pub validation_results: Vec<ValidationResult>,
    pub has_conflicts: bool,
    pub validated_metrics: Vec<FinancialMetric>,
    pub derived_metrics: Vec<FinancialMetric>,
    pub export_paths: BTreeMap<String, PathBuf>,
    pub errors: Vec<StageError>,
    pub stage_timings: BTreeMap<String, Duration>,
    pub phase: RunPhase,
}

impl AgentState {
    fn new(pdf_path: PathBuf) -> Self {
        Self {
            pdf_path,
            document_metadata: None,
            text_blocks: Vec::new(),
            table_blocks: Vec::new(),
            sections: Vec::new(),
            missing_sections: Vec::new(),
            candidates: Vec::new(),
            validation_results: Vec::new(),
            has_conflicts: false,
            validated_metrics: Vec::new(),
            derived_metrics: Vec::new(),
            export_paths: BTreeMap::new(),
            errors: Vec::new(),
            stage_timings: BTreeMap::new(),
            phase: RunPhase::Ingested,
        }
    }

    fn record_error(&mut self, stage: &str, error: &ExtractionError) {
        warn!("stage {stage} failed: {error}");
        self.errors.push(StageError {
            stage: stage.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn record_timing(&mut self, stage: &str, started: Instant) {
        self.stage_timings
            .insert(stage.to_string(), started.elapsed());
    }
}

/// Cooperative cancellation signal checked at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The staged extraction pipeline: blockify, locate, generate, normalize,
/// validate, adjudicate (or skip), derive, export.
///
/// A single stage failure never aborts the run; downstream stages treat
/// missing inputs as empty. Only ingestion errors are fatal.
pub struct FinancialPipeline<P = NullProvider> {
    config: PipelineConfig,
    ingestion: IngestionService,
    blockification: BlockificationService,
    locator: SectionLocator,
    generator: CandidateGenerator,
    normalizer: MetricNormalizerService,
    validator: DeterministicValidator,
    adjudicator: LlmAdjudicator<P>,
    derived: DerivedMetricsComputer,
    export: Option<ExportService>,
    commentary: Option<Commentary>,
    cancel: CancellationToken,
}

impl FinancialPipeline<NullProvider> {
    /// Pipeline without an LLM endpoint; conflicted groups fall back to the
    /// highest-confidence candidate.
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_provider(config, None)
    }
}

impl<P: LlmProvider> FinancialPipeline<P> {
    pub fn with_provider(config: PipelineConfig, provider: Option<P>) -> Self {
        let adjudicator = LlmAdjudicator::new(provider, config.performance.max_workers);
        Self {
            ingestion: IngestionService::new(&config),
            blockification: BlockificationService::new(&config),
            locator: SectionLocator::new(config.section_detection.clone()),
            generator: CandidateGenerator::new(),
            normalizer: MetricNormalizerService::from_config(&config),
            validator: DeterministicValidator::from_config(&config),
            adjudicator,
            derived: DerivedMetricsComputer::new(&config.validation),
            export: None,
            commentary: None,
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Install output writers; without them the run ends at derivation.
    pub fn with_export(mut self, export: ExportService) -> Self {
        self.export = Some(export);
        self
    }

    pub fn with_commentary(mut self, commentary: Commentary) -> Self {
        self.commentary = Some(commentary);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline over a PDF filing.
    pub async fn run(&self, pdf_path: &Path) -> AgentState {
        let mut state = AgentState::new(pdf_path.to_path_buf());

        // Ingestion is the only fatal stage.
        let started = Instant::now();
        match self.ingestion.ingest(pdf_path) {
            Ok(metadata) => {
                state.document_metadata = Some(metadata);
                state.record_timing("ingest", started);
            }
            Err(e) => {
                state.record_error("ingest", &e);
                state.record_timing("ingest", started);
                return state;
            }
        }

        if self.check_cancelled(&mut state) {
            return state;
        }

        let started = Instant::now();
        let (text_blocks, table_blocks) = self.blockification.parse(pdf_path).await;
        if text_blocks.is_empty() && table_blocks.is_empty() {
            state.record_error(
                "blockify",
                &ExtractionError::ExtractionEmpty("blockify".to_string()),
            );
        }
        state.text_blocks = text_blocks;
        state.table_blocks = table_blocks;
        state.record_timing("blockify", started);
        state.phase = RunPhase::Blockified;

        self.run_from_blocks(state).await
    }

    /// Run the stages downstream of blockification over in-memory blocks.
    pub async fn process_blocks(
        &self,
        pdf_path: &Path,
        metadata: Option<DocumentMetadata>,
        text_blocks: Vec<TextBlock>,
        table_blocks: Vec<TableBlock>,
    ) -> AgentState {
        let mut state = AgentState::new(pdf_path.to_path_buf());
        state.document_metadata = metadata;
        state.text_blocks = text_blocks;
        state.table_blocks = table_blocks;
        state.phase = RunPhase::Blockified;
        self.run_from_blocks(state).await
    }

    async fn run_from_blocks(&self, mut state: AgentState) -> AgentState {
        if self.check_cancelled(&mut state) {
            return state;
        }

        // Section location. Missing critical sections are recorded, not fatal.
        let started = Instant::now();
        state.sections = self.locator.locate_sections(&state.text_blocks);
        let (sections_ok, missing) = validate_sections(&state.sections);
        if !sections_ok {
            state.missing_sections = missing;
        }
        state.record_timing("locate_sections", started);
        state.phase = RunPhase::Located;

        if self.check_cancelled(&mut state) {
            return state;
        }

        // Candidate generation.
        let started = Instant::now();
        state.candidates = self.generator.generate_candidates(
            &state.sections,
            &state.table_blocks,
            &state.text_blocks,
        );
        if state.candidates.is_empty() {
            state.record_error(
                "generate_candidates",
                &ExtractionError::ExtractionEmpty("generate_candidates".to_string()),
            );
        }
        state.record_timing("generate_candidates", started);
        state.phase = RunPhase::CandidatesGenerated;

        if self.check_cancelled(&mut state) {
            return state;
        }

        // Normalization to the base currency/scale pair.
        let started = Instant::now();
        state.candidates = self.normalizer.normalize_candidates(&state.candidates);
        state.record_timing("normalize", started);

        // Deterministic validation.
        let started = Instant::now();
        state.validation_results = self.validator.validate_candidates(&state.candidates);
        let summary = ValidationAggregator::aggregate(&state.validation_results);
        state.has_conflicts = !summary.needs_adjudication.is_empty();
        info!(
            "validation: {} valid, {} for review, {} invalid",
            summary.valid, summary.needs_review, summary.invalid
        );
        state.record_timing("validate", started);
        state.phase = RunPhase::Validated;

        if self.check_cancelled(&mut state) {
            return state;
        }

        // The one conditional edge: adjudicate or go straight to derivation.
        let started = Instant::now();
        if state.has_conflicts {
            state.validated_metrics = self
                .adjudicator
                .adjudicate_candidates(&state.candidates, &state.validation_results)
                .await;
            state.record_timing("adjudicate", started);
            state.phase = RunPhase::Adjudicated;
        } else {
            state.validated_metrics = select_highest_confidence(&state.candidates);
            state.record_timing("adjudicate", started);
            state.phase = RunPhase::Skipped;
        }

        if self.check_cancelled(&mut state) {
            return state;
        }

        // Derived metrics.
        let started = Instant::now();
        state.derived_metrics = self.derived.compute_all(&state.validated_metrics);
        state.record_timing("derive", started);
        state.phase = RunPhase::Derived;

        // Export through the configured writers.
        if let (Some(export), Some(metadata)) = (&self.export, &state.document_metadata) {
            let started = Instant::now();
            let mut all_metrics = state.validated_metrics.clone();
            all_metrics.extend(state.derived_metrics.iter().cloned());

            for (format, outcome) in
                export.export_all(&all_metrics, metadata, self.commentary.as_ref())
            {
                match outcome {
                    Ok(path) => {
                        state.export_paths.insert(format, path);
                    }
                    Err(e) => state.record_error("export", &e),
                }
            }
            state.record_timing("export", started);
        }

        state.phase = RunPhase::Done;
        info!(
            "pipeline complete: {} candidates, {} validated, {} derived, {} errors",
            state.candidates.len(),
            state.validated_metrics.len(),
            state.derived_metrics.len(),
            state.errors.len()
        );

        state
    }

    fn check_cancelled(&self, state: &mut AgentState) -> bool {
        if self.cancel.is_cancelled() {
            state.record_error(
                "pipeline",
                &ExtractionError::ExtractionEmpty("cancelled".to_string()),
            );
            warn!("pipeline cancelled, returning partial state");
            return true;
        }
        false
    }
}
