use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use filing_metrics::llm::LlmAdjudicator;
use filing_metrics::parsers::PdfParser;
use filing_metrics::{
    BlockificationService, BlockType, CandidateSource, CandidateValue, DeterministicValidator,
    Evidence, ExtractionMethod, FinancialPipeline, LabelStandardizer, LlmProvider, PipelineConfig,
    RunPhase, Scale, SectionType, TableBlock, TableMetadata, TextBlock, ValidationAggregator,
    ValidationStatus,
};

fn text_block(id: &str, text: &str, page: u32) -> TextBlock {
    TextBlock {
        block_id: id.to_string(),
        text: text.to_string(),
        page_number: page,
        block_type: BlockType::Heading,
        bbox: None,
        font_info: None,
    }
}

fn table(id: &str, page: u32, headers: Vec<Vec<&str>>, data: Vec<Vec<&str>>) -> TableBlock {
    TableBlock::new(
        id.to_string(),
        page,
        headers
            .into_iter()
            .map(|row| row.into_iter().map(str::to_string).collect())
            .collect(),
        data.into_iter()
            .map(|row| row.into_iter().map(str::to_string).collect())
            .collect(),
        TableMetadata::default(),
    )
}

fn candidate(id: &str, name: &str, value: Decimal, currency: &str, year: i32) -> CandidateValue {
    CandidateValue {
        candidate_id: id.to_string(),
        metric_name: name.to_string(),
        value,
        currency: currency.to_string(),
        scale: Scale::Millions,
        period_end_date: NaiveDate::from_ymd_opt(year, 12, 31),
        section_type: SectionType::BalanceSheet,
        source: CandidateSource::TableCell,
        confidence_score: 0.8,
        evidence: Evidence::default(),
        extraction_timestamp: Utc::now(),
    }
}

/// Provider that always picks the first candidate listed in the prompt.
struct FirstListedProvider;

impl LlmProvider for FirstListedProvider {
    async fn generate(&self, prompt: &str) -> filing_metrics::Result<String> {
        let id_pattern = Regex::new(r"- ID: (\S+)").unwrap();
        let selected = id_pattern
            .captures(prompt)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default();
        Ok(format!(
            "```json\n{{\"selected_candidate_id\": \"{selected}\", \"confidence\": 0.9, \
             \"reasoning\": \"first listed candidate\"}}\n```"
        ))
    }
}

// S1: two revenue candidates a year apart produce an exact 10% growth metric.
#[tokio::test]
async fn yoy_growth_is_derived_exactly() {
    let pipeline = FinancialPipeline::new(PipelineConfig::default());

    let blocks = vec![text_block("h1", "Consolidated Income Statement", 1)];
    let tables = vec![table(
        "t1",
        1,
        vec![vec!["", "2023", "2022"]],
        vec![vec!["Revenue", "1,100", "1,000"]],
    )];

    let state = pipeline
        .process_blocks(Path::new("s1.pdf"), None, blocks, tables)
        .await;

    assert_eq!(state.phase, RunPhase::Done);
    let growth = state
        .derived_metrics
        .iter()
        .find(|m| m.metric_name == "Revenue Growth YoY")
        .expect("growth metric missing");

    assert_eq!(growth.value, dec!(0.10));
    assert_eq!(growth.scale, Scale::Actual);
    assert_eq!(growth.extraction_method, ExtractionMethod::Calculated);
    assert_eq!(growth.period_end_date, NaiveDate::from_ymd_opt(2023, 12, 31));
}

// S2: a parenthesized table cell becomes a negative candidate with defaults.
#[tokio::test]
async fn parenthesized_cell_yields_negative_candidate() {
    let pipeline = FinancialPipeline::new(PipelineConfig::default());

    let blocks = vec![text_block("h1", "Consolidated Income Statement", 1)];
    let tables = vec![table(
        "t1",
        1,
        vec![vec!["", "2023"]],
        vec![vec!["Operating expenses", "(250.5)"]],
    )];

    let state = pipeline
        .process_blocks(Path::new("s2.pdf"), None, blocks, tables)
        .await;

    let opex = state
        .candidates
        .iter()
        .find(|c| c.metric_name == "operating_expenses")
        .expect("candidate missing");

    assert_eq!(opex.value, dec!(-250.5));
    assert_eq!(opex.scale, Scale::Millions);
    assert_eq!(opex.currency, "GBP");
    assert_eq!(opex.period_end_date, NaiveDate::from_ymd_opt(2023, 12, 31));
}

// S3: the arithmetic identity passes at 1000 and routes to adjudication at 1060.
#[tokio::test]
async fn arithmetic_tie_out_controls_adjudication_routing() {
    let balance_blocks = |total: &'static str| {
        (
            vec![text_block("h1", "Consolidated Balance Sheet", 1)],
            vec![table(
                "t1",
                1,
                vec![vec!["", "2023"]],
                vec![
                    vec!["Current assets", "300"],
                    vec!["Non-current assets", "700"],
                    vec!["Total assets", total],
                ],
            )],
        )
    };

    let pipeline = FinancialPipeline::new(PipelineConfig::default());
    let (blocks, tables) = balance_blocks("1,000");
    let state = pipeline
        .process_blocks(Path::new("s3a.pdf"), None, blocks, tables)
        .await;
    assert!(!state.has_conflicts);
    assert_eq!(state.phase, RunPhase::Done);

    let pipeline = FinancialPipeline::with_provider(
        PipelineConfig::default(),
        Some(FirstListedProvider),
    );
    let (blocks, tables) = balance_blocks("1,060");
    let state = pipeline
        .process_blocks(Path::new("s3b.pdf"), None, blocks, tables)
        .await;

    assert!(state.has_conflicts);
    let statuses = ValidationAggregator::candidate_statuses(&state.validation_results);
    let total_assets = state
        .candidates
        .iter()
        .find(|c| c.metric_name == "total_assets")
        .unwrap();
    assert_eq!(statuses[&total_assets.candidate_id], ValidationStatus::NeedsReview);

    // The run went through the adjudicator and still produced a winner.
    let adjudicated = state
        .validated_metrics
        .iter()
        .find(|m| m.metric_name == "total_assets")
        .unwrap();
    assert_eq!(adjudicated.llm_reasoning.as_deref(), Some("first listed candidate"));
}

// S4: an unknown currency fails the unit rule; a second defect makes the
// candidate invalid overall.
#[test]
fn unit_consistency_failures_accumulate() {
    let validator = DeterministicValidator::default();

    let candidates = vec![candidate("c1", "revenue", dec!(100), "XYZ", 2023)];
    let results = validator.validate_candidates(&candidates);
    let statuses = ValidationAggregator::candidate_statuses(&results);
    assert_eq!(statuses["c1"], ValidationStatus::NeedsReview);

    // Add a range defect on top: net income at 5x revenue in bad currency.
    let candidates = vec![
        candidate("c1", "revenue", dec!(100), "GBP", 2023),
        candidate("c2", "net_income", dec!(500), "XYZ", 2023),
    ];
    let results = validator.validate_candidates(&candidates);
    let statuses = ValidationAggregator::candidate_statuses(&results);
    assert_eq!(statuses["c2"], ValidationStatus::Invalid);
}

// S5: identical tables from two backends are deduplicated, keeping the
// specialist's copy.
#[tokio::test]
async fn duplicate_tables_across_backends_collapse() {
    struct FixedTables {
        name: &'static str,
        specialist: bool,
        table_id: &'static str,
    }

    impl PdfParser for FixedTables {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_table_specialist(&self) -> bool {
            self.specialist
        }

        fn parse(
            &self,
            _path: &Path,
        ) -> filing_metrics::Result<(Vec<TextBlock>, Vec<TableBlock>)> {
            Ok((
                Vec::new(),
                vec![table(
                    self.table_id,
                    3,
                    vec![vec!["", "2023"]],
                    vec![vec!["Revenue", "1,250.5"], vec!["EBITDA", "310.0"]],
                )],
            ))
        }
    }

    let service = BlockificationService::with_adapters(
        vec![
            Arc::new(FixedTables {
                name: "layout",
                specialist: false,
                table_id: "layout_copy",
            }),
            Arc::new(FixedTables {
                name: "table_specialist",
                specialist: true,
                table_id: "specialist_copy",
            }),
        ],
        true,
        std::time::Duration::from_secs(5),
    );

    let (_, tables) = service.parse(Path::new("s5.pdf")).await;
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].table_id, "specialist_copy");
}

// S6: common revenue labels standardize; unknown labels come back unchanged.
#[test]
fn label_standardization_covers_revenue_variants() {
    let standardizer = LabelStandardizer::new();
    assert_eq!(standardizer.standardize("Total Revenue"), "revenue");
    assert_eq!(standardizer.standardize("Net Sales"), "revenue");
    assert_eq!(standardizer.standardize("Turnover"), "revenue");
    assert_eq!(standardizer.standardize("foobar"), "foobar");
}

// S7: a filing with only an income statement still yields candidates, and the
// missing critical sections are reported.
#[tokio::test]
async fn missing_critical_sections_do_not_stop_extraction() {
    let pipeline = FinancialPipeline::new(PipelineConfig::default());

    let blocks = vec![text_block("h1", "Consolidated Income Statement", 1)];
    let tables = vec![table(
        "t1",
        1,
        vec![vec!["", "2023"]],
        vec![vec!["Revenue", "1,250.5"]],
    )];

    let state = pipeline
        .process_blocks(Path::new("s7.pdf"), None, blocks, tables)
        .await;

    assert_eq!(
        state.missing_sections,
        vec![SectionType::BalanceSheet, SectionType::CashFlow]
    );
    assert_eq!(state.phase, RunPhase::Done);
    assert!(!state.candidates.is_empty());
    assert!(!state.validated_metrics.is_empty());
}

// Adjudicator fallback property: with no provider the winning value is the
// highest-confidence candidate's, unchanged.
#[tokio::test]
async fn adjudication_without_provider_uses_highest_confidence() {
    let adjudicator: LlmAdjudicator<filing_metrics::NullProvider> = LlmAdjudicator::new(None, 2);

    let mut weak = candidate("c1", "total_assets", dec!(1060), "GBP", 2023);
    weak.confidence_score = 0.5;
    let mut strong = candidate("c2", "total_assets", dec!(1000), "GBP", 2023);
    strong.confidence_score = 0.9;

    let validator = DeterministicValidator::default();
    let all = vec![
        weak,
        strong,
        candidate("c3", "current_assets", dec!(300), "GBP", 2023),
        candidate("c4", "non_current_assets", dec!(700), "GBP", 2023),
    ];
    let results = validator.validate_candidates(&all);

    let metrics = adjudicator.adjudicate_candidates(&all, &results).await;
    let total_assets = metrics
        .iter()
        .find(|m| m.metric_name == "total_assets")
        .unwrap();
    assert_eq!(total_assets.metric_id, "c2");
    assert_eq!(total_assets.value, dec!(1000));
}

// Rectangularity holds across merged output even for ragged parser rows.
#[test]
fn merged_tables_stay_rectangular() {
    let ragged = TableBlock::new(
        "t1".to_string(),
        1,
        vec![vec!["".to_string(), "2023".to_string(), "2022".to_string()]],
        vec![
            vec!["Revenue".to_string(), "1,100".to_string()],
            vec!["EBITDA".to_string()],
        ],
        TableMetadata::default(),
    );

    let width = ragged.headers[0].len();
    assert!(ragged.data.iter().all(|row| row.len() == width));
}

// End-to-end determinism: the same in-memory filing yields identical
// candidate and derived streams on a second run.
#[tokio::test]
async fn rerun_is_deterministic() {
    let run = || async {
        let pipeline = FinancialPipeline::new(PipelineConfig::default());
        let blocks = vec![text_block("h1", "Consolidated Income Statement", 1)];
        let tables = vec![table(
            "t1",
            1,
            vec![vec!["", "2023", "2022"]],
            vec![
                vec!["Revenue", "1,100", "1,000"],
                vec!["Operating expenses", "(250.5)", "(230.0)"],
            ],
        )];
        pipeline
            .process_blocks(Path::new("det.pdf"), None, blocks, tables)
            .await
    };

    let first = run().await;
    let second = run().await;

    let ids = |state: &filing_metrics::AgentState| -> Vec<(String, String, Decimal)> {
        state
            .candidates
            .iter()
            .map(|c| (c.candidate_id.clone(), c.metric_name.clone(), c.value))
            .collect()
    };
    assert_eq!(ids(&first), ids(&second));

    let derived = |state: &filing_metrics::AgentState| -> Vec<(String, Decimal)> {
        state
            .derived_metrics
            .iter()
            .map(|m| (m.metric_id.clone(), m.value))
            .collect()
    };
    assert_eq!(derived(&first), derived(&second));
}
