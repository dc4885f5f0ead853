use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Classification of a text block on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Heading,
    Body,
    Footnote,
    Table,
}

/// Font metadata captured by adapters that expose it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FontInfo {
    pub size: Option<f64>,
    pub name: Option<String>,
}

/// A paragraph-level unit of visible text with positional metadata.
///
/// Immutable after emission by a parser adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub block_id: String,
    pub text: String,
    /// 1-indexed page number.
    pub page_number: u32,
    pub block_type: BlockType,
    pub bbox: Option<[f64; 4]>,
    pub font_info: Option<FontInfo>,
}

/// Magnitude multiplier applied to a stated numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Actual,
    Thousands,
    Millions,
    Billions,
}

impl Scale {
    pub fn multiplier(self) -> Decimal {
        match self {
            Self::Actual => Decimal::ONE,
            Self::Thousands => Decimal::from(1_000),
            Self::Millions => Decimal::from(1_000_000),
            Self::Billions => Decimal::from(1_000_000_000),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actual => "actual",
            Self::Thousands => "thousands",
            Self::Millions => "millions",
            Self::Billions => "billions",
        }
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata detected on a table (currency markers, scale markers, year labels).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub currency: Option<String>,
    pub scale: Option<Scale>,
    pub years: Vec<String>,
    pub accuracy: Option<f64>,
}

/// A rectangular table extracted from a page.
///
/// Every data row has the same length as the widest header row; adapters that
/// cannot guarantee this pad with empty strings via [`TableBlock::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBlock {
    pub table_id: String,
    /// 1-indexed page number.
    pub page_number: u32,
    pub headers: Vec<Vec<String>>,
    pub data: Vec<Vec<String>>,
    pub metadata: TableMetadata,
    pub bbox: Option<[f64; 4]>,
}

impl TableBlock {
    /// Build a table, padding every row out to the widest header or data row.
    pub fn new(
        table_id: String,
        page_number: u32,
        headers: Vec<Vec<String>>,
        data: Vec<Vec<String>>,
        metadata: TableMetadata,
    ) -> Self {
        let width = headers
            .iter()
            .chain(data.iter())
            .map(Vec::len)
            .max()
            .unwrap_or(0);

        let pad = |mut rows: Vec<Vec<String>>| {
            for row in &mut rows {
                row.resize(width, String::new());
            }
            rows
        };

        Self {
            table_id,
            page_number,
            headers: pad(headers),
            data: pad(data),
            metadata,
            bbox: None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn column_count(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    /// Text of the first cell in the first data row, trimmed.
    pub fn first_data_cell(&self) -> Option<&str> {
        self.data
            .first()
            .and_then(|row| row.first())
            .map(|cell| cell.trim())
    }
}

/// The recognized financial-statement section types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    IncomeStatement,
    CashFlow,
    BalanceSheet,
    Borrowings,
    Notes,
    Revenue,
    Ebitda,
}

impl SectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncomeStatement => "income_statement",
            Self::CashFlow => "cash_flow",
            Self::BalanceSheet => "balance_sheet",
            Self::Borrowings => "borrowings",
            Self::Notes => "notes",
            Self::Revenue => "revenue",
            Self::Ebitda => "ebitda",
        }
    }

    /// Sections whose absence makes a filing unreportable.
    pub fn critical() -> [Self; 3] {
        [Self::IncomeStatement, Self::BalanceSheet, Self::CashFlow]
    }
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Regex,
    Embedding,
    Hybrid,
}

/// A contiguous page range classified as one financial-statement section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub section_type: SectionType,
    pub section_name: String,
    pub start_page: u32,
    pub end_page: u32,
    pub confidence: f64,
    pub detection_method: DetectionMethod,
}

impl Section {
    pub fn contains_page(&self, page: u32) -> bool {
        self.start_page <= page && page <= self.end_page
    }
}

/// Where a candidate value was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    TableCell,
    TextBlock,
}

/// Provenance trail for a candidate value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub table_id: Option<String>,
    pub row_index: Option<usize>,
    pub column_index: Option<usize>,
    pub raw_label: Option<String>,
    pub raw_value: Option<String>,
    pub page: Option<u32>,
    pub period_label: Option<String>,
    pub section_id: Option<String>,
    pub block_id: Option<String>,
    pub raw_text: Option<String>,
}

impl Evidence {
    /// Number of populated fields, used by candidate scoring.
    pub fn populated_field_count(&self) -> usize {
        [
            self.table_id.is_some(),
            self.row_index.is_some(),
            self.column_index.is_some(),
            self.raw_label.is_some(),
            self.raw_value.is_some(),
            self.page.is_some(),
            self.period_label.is_some(),
            self.section_id.is_some(),
            self.block_id.is_some(),
            self.raw_text.is_some(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }
}

/// A tentative metric value with full provenance, not yet validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateValue {
    pub candidate_id: String,
    /// Canonical metric label (e.g. `revenue`).
    pub metric_name: String,
    pub value: Decimal,
    pub currency: String,
    pub scale: Scale,
    pub period_end_date: Option<NaiveDate>,
    pub section_type: SectionType,
    pub source: CandidateSource,
    pub confidence_score: f64,
    pub evidence: Evidence,
    pub extraction_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    NeedsReview,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSeverity {
    Minor,
    Major,
    Critical,
}

/// Outcome of one rule applied to one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub candidate_id: String,
    pub rule_name: String,
    pub status: ValidationStatus,
    pub severity: ValidationSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ValidationResult {
    pub fn is_issue(&self) -> bool {
        self.status != ValidationStatus::Valid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Consolidated,
    Parent,
    Subsidiary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Table,
    Text,
    Calculated,
}

/// An adjudicated or derived metric, ready for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialMetric {
    pub metric_id: String,
    pub metric_name: String,
    pub value: Decimal,
    pub currency: String,
    pub scale: Scale,
    pub period_end_date: Option<NaiveDate>,
    pub entity_type: EntityType,
    pub extraction_method: ExtractionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl FinancialMetric {
    /// The value expressed in base (actual) units.
    pub fn to_base_units(&self) -> Decimal {
        self.value * self.scale.multiplier()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Annual,
    HalfYear,
    Quarterly,
    Rns,
}

/// Document-level metadata populated at ingestion, read-only downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub company_name: String,
    pub company_identifier: Option<String>,
    pub report_type: ReportType,
    pub fiscal_period_end: NaiveDate,
    pub currency: String,
    pub filing_date: Option<NaiveDate>,
    pub source_path: String,
    pub page_count: Option<u32>,
    pub file_size_bytes: Option<u64>,
}
