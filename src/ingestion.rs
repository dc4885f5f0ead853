use std::path::Path;

use chrono::{Datelike, NaiveDate, Utc};
use log::{debug, info};
use regex::Regex;

use crate::config::PipelineConfig;
use crate::currency::CurrencyDetector;
use crate::error::{ExtractionError, Result};
use crate::periods::{PeriodParser, PeriodType};
use crate::schema::{DocumentMetadata, ReportType};

/// Validates an input filing and populates its [`DocumentMetadata`].
///
/// This is the only stage whose failures abort the run.
pub struct IngestionService {
    max_file_size_bytes: u64,
    default_currency: String,
    period_parser: PeriodParser,
}

impl IngestionService {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_file_size_bytes: config.max_file_size_mb * 1024 * 1024,
            default_currency: config.base_currency.clone(),
            period_parser: PeriodParser::new(),
        }
    }

    pub fn ingest(&self, path: &Path) -> Result<DocumentMetadata> {
        info!("ingesting {}", path.display());

        let file_size = self.validate_file(path)?;
        let document = lopdf::Document::load(path).map_err(|e| {
            ExtractionError::InputInvalid(format!("not a decodable PDF: {e}"))
        })?;

        let page_count = document.get_pages().len() as u32;
        if page_count == 0 {
            return Err(ExtractionError::InputInvalid(
                "PDF has no pages".to_string(),
            ));
        }

        let first_page = document
            .get_pages()
            .keys()
            .next()
            .and_then(|page| document.extract_text(&[*page]).ok())
            .unwrap_or_default();

        let file_stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");

        let company_name = extract_company_name(&first_page)
            .unwrap_or_else(|| file_stem.replace(['_', '-'], " "));
        let company_identifier = extract_company_identifier(&first_page);
        let report_type = classify_report_type(file_stem, &first_page);
        let fiscal_period_end = self
            .detect_fiscal_period_end(&first_page)
            .unwrap_or_else(default_period_end);
        let currency =
            CurrencyDetector::detect(&first_page).unwrap_or_else(|| self.default_currency.clone());

        let metadata = DocumentMetadata {
            document_id: format!("doc_{}", sanitize_id(file_stem)),
            company_name,
            company_identifier,
            report_type,
            fiscal_period_end,
            currency,
            filing_date: None,
            source_path: path.display().to_string(),
            page_count: Some(page_count),
            file_size_bytes: Some(file_size),
        };

        info!(
            "ingested {} ({:?}, {} pages)",
            metadata.company_name, metadata.report_type, page_count
        );

        Ok(metadata)
    }

    fn validate_file(&self, path: &Path) -> Result<u64> {
        let file_metadata = std::fs::metadata(path).map_err(|_| {
            ExtractionError::InputInvalid(format!("file not found: {}", path.display()))
        })?;

        let file_size = file_metadata.len();
        if file_size > self.max_file_size_bytes {
            return Err(ExtractionError::InputInvalid(format!(
                "file too large: {file_size} bytes (max {} bytes)",
                self.max_file_size_bytes
            )));
        }

        Ok(file_size)
    }

    fn detect_fiscal_period_end(&self, first_page: &str) -> Option<NaiveDate> {
        for line in first_page.lines().take(40) {
            if let Some(parsed) = self.period_parser.parse_period_label(line) {
                if parsed.period_type == PeriodType::FiscalYear {
                    debug!("fiscal period end detected from {line:?}");
                    return Some(parsed.end_date);
                }
            }
        }
        None
    }
}

/// First plausible title line of the cover page.
fn extract_company_name(first_page: &str) -> Option<String> {
    first_page
        .lines()
        .map(str::trim)
        .find(|line| {
            line.len() >= 3
                && line.len() <= 100
                && line.chars().any(|c| c.is_alphabetic())
                && !line.chars().all(|c| c.is_numeric() || c.is_whitespace())
        })
        .map(str::to_string)
}

/// Ticker-style identifier near the top of the cover page (LSE `TSCO.L`
/// style first, then `ACME: NYSE` exchange listings).
fn extract_company_identifier(first_page: &str) -> Option<String> {
    let ticker_patterns = [
        r"\b([A-Z]{2,4}\.L)\b",
        r"\b([A-Z]{2,4})\b:\s*[A-Z]{2,4}",
    ];

    let head: String = first_page.chars().take(500).collect();
    for pattern in ticker_patterns {
        let pattern = Regex::new(pattern).expect("ticker pattern must compile");
        if let Some(caps) = pattern.captures(&head) {
            debug!("company identifier detected: {}", &caps[1]);
            return Some(caps[1].to_string());
        }
    }

    None
}

fn classify_report_type(file_stem: &str, first_page: &str) -> ReportType {
    let haystack = format!("{} {}", file_stem, first_page).to_lowercase();

    if haystack.contains("rns") || haystack.contains("regulatory news") {
        ReportType::Rns
    } else if haystack.contains("interim")
        || haystack.contains("half year")
        || haystack.contains("half-year")
        || haystack.contains("six months")
    {
        ReportType::HalfYear
    } else if haystack.contains("quarter")
        || haystack.contains("q1 ")
        || haystack.contains("q2 ")
        || haystack.contains("q3 ")
        || haystack.contains("q4 ")
        || haystack.contains("three months")
    {
        ReportType::Quarterly
    } else {
        ReportType::Annual
    }
}

fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn default_period_end() -> NaiveDate {
    let today = Utc::now().date_naive();
    NaiveDate::from_ymd_opt(today.year() - 1, 12, 31).unwrap_or(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_input_invalid() {
        let service = IngestionService::new(&PipelineConfig::default());
        let result = service.ingest(Path::new("/nonexistent/report.pdf"));
        assert!(matches!(result, Err(ExtractionError::InputInvalid(_))));
    }

    #[test]
    fn test_oversized_file_is_rejected() {
        let config = PipelineConfig {
            max_file_size_mb: 0,
            ..PipelineConfig::default()
        };
        let service = IngestionService::new(&config);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.4 not really a pdf").unwrap();

        let result = service.ingest(file.path());
        assert!(matches!(result, Err(ExtractionError::InputInvalid(message)) if message.contains("too large")));
    }

    #[test]
    fn test_undecodable_file_is_rejected() {
        let service = IngestionService::new(&PipelineConfig::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a pdf at all").unwrap();

        let result = service.ingest(file.path());
        assert!(matches!(result, Err(ExtractionError::InputInvalid(_))));
    }

    #[test]
    fn test_classify_report_type() {
        assert_eq!(
            classify_report_type("acme_annual_report_2023", ""),
            ReportType::Annual
        );
        assert_eq!(
            classify_report_type("acme_interim_2023", ""),
            ReportType::HalfYear
        );
        assert_eq!(
            classify_report_type("results", "Three months ended 31 March 2024"),
            ReportType::Quarterly
        );
        assert_eq!(classify_report_type("acme_rns_20240215", ""), ReportType::Rns);
    }

    #[test]
    fn test_extract_company_name_skips_noise() {
        let page = "\n  2023  \nAcme Holdings plc\nAnnual Report";
        assert_eq!(extract_company_name(page).as_deref(), Some("Acme Holdings plc"));
    }

    #[test]
    fn test_extract_company_identifier_lse_ticker() {
        let page = "Acme Holdings plc (TSCO.L)\nAnnual Report 2023";
        assert_eq!(extract_company_identifier(page).as_deref(), Some("TSCO.L"));
    }

    #[test]
    fn test_extract_company_identifier_exchange_listing() {
        let page = "Acme Holdings\nACME: NYSE\nAnnual Report 2023";
        assert_eq!(extract_company_identifier(page).as_deref(), Some("ACME"));
    }

    #[test]
    fn test_extract_company_identifier_absent() {
        assert_eq!(extract_company_identifier("Annual Report 2023"), None);
        // Only the head of the cover page is searched.
        let buried = format!("{}TSCO.L", "x".repeat(600));
        assert_eq!(extract_company_identifier(&buried), None);
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("Acme 2023-AR"), "acme_2023_ar");
    }
}
