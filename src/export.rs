use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::error::{ExtractionError, Result};
use crate::schema::{DocumentMetadata, FinancialMetric};

/// Section-keyed narrative commentary supplied by an external generator.
pub type Commentary = BTreeMap<String, String>;

/// Contract for output writers: an ordered metric sequence plus document
/// metadata and optional commentary in, an output file path back.
pub trait MetricWriter {
    fn format_name(&self) -> &'static str;

    fn write(
        &self,
        metrics: &[FinancialMetric],
        metadata: &DocumentMetadata,
        commentary: Option<&Commentary>,
    ) -> Result<PathBuf>;
}

fn output_file_name(metadata: &DocumentMetadata, extension: &str) -> String {
    let company: String = metadata
        .company_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!(
        "{company}_{}_metrics.{extension}",
        metadata.fiscal_period_end.format("%Y%m%d")
    )
}

#[derive(Serialize)]
struct JsonReport<'a> {
    document: &'a DocumentMetadata,
    metrics: &'a [FinancialMetric],
    #[serde(skip_serializing_if = "Option::is_none")]
    commentary: Option<&'a Commentary>,
}

/// Emits the full metric set as a JSON document.
pub struct JsonWriter {
    output_dir: PathBuf,
}

impl JsonWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl MetricWriter for JsonWriter {
    fn format_name(&self) -> &'static str {
        "json"
    }

    fn write(
        &self,
        metrics: &[FinancialMetric],
        metadata: &DocumentMetadata,
        commentary: Option<&Commentary>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(output_file_name(metadata, "json"));

        let report = JsonReport {
            document: metadata,
            metrics,
            commentary,
        };
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, &report)?;

        info!("wrote {} metrics to {}", metrics.len(), path.display());
        Ok(path)
    }
}

/// Emits a flat tabular workbook (CSV) of the metric series.
pub struct CsvWriter {
    output_dir: PathBuf,
}

impl CsvWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl MetricWriter for CsvWriter {
    fn format_name(&self) -> &'static str {
        "csv"
    }

    fn write(
        &self,
        metrics: &[FinancialMetric],
        metadata: &DocumentMetadata,
        _commentary: Option<&Commentary>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(output_file_name(metadata, "csv"));

        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| ExtractionError::ExportError(e.to_string()))?;

        writer
            .write_record([
                "metric_id",
                "metric_name",
                "value",
                "currency",
                "scale",
                "period_end_date",
                "entity_type",
                "extraction_method",
                "notes",
            ])
            .map_err(|e| ExtractionError::ExportError(e.to_string()))?;

        for metric in metrics {
            writer
                .write_record([
                    metric.metric_id.as_str(),
                    metric.metric_name.as_str(),
                    &metric.value.to_string(),
                    metric.currency.as_str(),
                    metric.scale.as_str(),
                    &metric
                        .period_end_date
                        .map_or_else(String::new, |d| d.to_string()),
                    &format!("{:?}", metric.entity_type).to_lowercase(),
                    &format!("{:?}", metric.extraction_method).to_lowercase(),
                    metric.notes.as_deref().unwrap_or(""),
                ])
                .map_err(|e| ExtractionError::ExportError(e.to_string()))?;
        }

        writer
            .flush()
            .map_err(|e| ExtractionError::ExportError(e.to_string()))?;

        info!("wrote {} metrics to {}", metrics.len(), path.display());
        Ok(path)
    }
}

/// Runs every configured writer over the final metric set.
pub struct ExportService {
    writers: Vec<Box<dyn MetricWriter + Send + Sync>>,
}

impl ExportService {
    /// JSON + CSV writers targeting `output_dir`.
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        let dir = output_dir.as_ref().to_path_buf();
        Self {
            writers: vec![
                Box::new(JsonWriter::new(dir.clone())),
                Box::new(CsvWriter::new(dir)),
            ],
        }
    }

    pub fn with_writers(writers: Vec<Box<dyn MetricWriter + Send + Sync>>) -> Self {
        Self { writers }
    }

    /// Returns format name -> written path; writer failures are reported per
    /// format, not fatal to the others.
    pub fn export_all(
        &self,
        metrics: &[FinancialMetric],
        metadata: &DocumentMetadata,
        commentary: Option<&Commentary>,
    ) -> BTreeMap<String, Result<PathBuf>> {
        self.writers
            .iter()
            .map(|writer| {
                (
                    writer.format_name().to_string(),
                    writer.write(metrics, metadata, commentary),
                )
            })
            .collect()
    }
}
