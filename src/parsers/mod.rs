//! Parser adapters wrapping the PDF decode backends.
//!
//! Every adapter exposes the same contract: decode a PDF into streams of
//! [`TextBlock`]s and [`TableBlock`]s in (page, in-page) order. Adapters catch
//! and log backend errors; a whole-document decode failure surfaces as
//! [`ExtractionError::BackendFailure`] so the blockification merge can skip
//! that backend.

mod dense_text;
mod layout;
mod table_specialist;

use std::path::Path;
use std::sync::Arc;

use log::warn;
use regex::Regex;

use crate::currency::{CurrencyDetector, ScaleConverter};
use crate::error::Result;
use crate::schema::{BlockType, TableBlock, TableMetadata, TextBlock};

pub use dense_text::DenseTextParser;
pub use layout::LayoutParser;
pub use table_specialist::TableSpecialistParser;

/// The single parsing capability all backends implement.
pub trait PdfParser: Send + Sync {
    /// Stable adapter name used in `parser_priority` and block ids.
    fn name(&self) -> &'static str;

    /// Whether this adapter specializes in tables (preferred during merge).
    fn is_table_specialist(&self) -> bool {
        false
    }

    fn parse(&self, path: &Path) -> Result<(Vec<TextBlock>, Vec<TableBlock>)>;
}

/// Build adapters in the order given by `parser_priority`; unknown names are
/// skipped with a warning.
pub fn build_adapters(priority: &[String]) -> Vec<Arc<dyn PdfParser>> {
    let mut adapters: Vec<Arc<dyn PdfParser>> = Vec::new();
    for name in priority {
        match name.as_str() {
            "dense_text" => adapters.push(Arc::new(DenseTextParser::new())),
            "layout" => adapters.push(Arc::new(LayoutParser::new())),
            "table_specialist" => adapters.push(Arc::new(TableSpecialistParser::new())),
            other => warn!("unknown parser adapter {other:?}, skipping"),
        }
    }
    adapters
}

/// Classify a paragraph using font size where available, falling back to
/// shape heuristics.
pub(crate) fn classify_text_block(text: &str, font_size: Option<f64>) -> BlockType {
    if font_size.is_some_and(|size| size > 14.0) {
        return BlockType::Heading;
    }

    let head: String = text.chars().take(20).collect::<String>().to_lowercase();
    if head.starts_with("note:") || head.starts_with("footnote") {
        return BlockType::Footnote;
    }

    let trimmed = text.trim();
    if trimmed.len() < 100 && !trimmed.is_empty() {
        let has_letters = trimmed.chars().any(|c| c.is_alphabetic());
        let all_upper = has_letters
            && trimmed
                .chars()
                .filter(|c| c.is_alphabetic())
                .all(|c| c.is_uppercase());
        if all_upper {
            return BlockType::Heading;
        }
    }

    BlockType::Body
}

/// Split page text into blank-line-delimited paragraphs.
pub(crate) fn split_paragraphs(page_text: &str) -> Vec<String> {
    page_text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Detect currency, scale and year markers across a table's cells.
pub(crate) fn detect_table_metadata(
    headers: &[Vec<String>],
    data: &[Vec<String>],
) -> TableMetadata {
    let all_text: String = headers
        .iter()
        .chain(data.iter())
        .map(|row| row.join(" "))
        .collect::<Vec<_>>()
        .join(" ");

    let mut metadata = TableMetadata {
        currency: CurrencyDetector::detect(&all_text),
        ..TableMetadata::default()
    };

    let detected_scale = ScaleConverter::detect_scale(&all_text);
    if detected_scale != crate::schema::Scale::Actual {
        metadata.scale = Some(detected_scale);
    }

    let year_pattern = Regex::new(r"\b(20\d{2})\b").expect("year pattern must compile");
    let mut years: Vec<String> = Vec::new();
    for row in headers {
        for cell in row {
            for caps in year_pattern.captures_iter(cell) {
                let year = caps[1].to_string();
                if !years.contains(&year) {
                    years.push(year);
                }
            }
        }
    }
    metadata.years = years;

    metadata
}

/// True when a row looks like table data: at least two cells, one numeric.
fn is_table_line(cells: &[String]) -> bool {
    cells.len() >= 2 && cells.iter().any(|cell| cell.chars().any(|c| c.is_ascii_digit()))
}

/// Reconstruct tables from positioned text lines.
///
/// `split_row` turns one line into cells (the flavor decides how). Consecutive
/// table-shaped lines are grouped into one table; the first row is the header,
/// and a mostly non-numeric second row joins the header.
pub(crate) fn tables_from_lines<F>(
    page_text: &str,
    page_number: u32,
    id_prefix: &str,
    split_row: F,
) -> Vec<TableBlock>
where
    F: Fn(&str) -> Vec<String>,
{
    let mut tables = Vec::new();
    let mut current_rows: Vec<Vec<String>> = Vec::new();

    let flush = |rows: &mut Vec<Vec<String>>, tables: &mut Vec<TableBlock>| {
        if rows.len() >= 2 {
            let table_idx = tables.len();
            if let Some(table) = build_table(
                std::mem::take(rows),
                page_number,
                &format!("{id_prefix}_table_{page_number}_{table_idx}"),
            ) {
                tables.push(table);
            }
        } else {
            rows.clear();
        }
    };

    for line in page_text.lines() {
        let cells = split_row(line);
        if is_table_line(&cells) {
            current_rows.push(cells);
        } else {
            flush(&mut current_rows, &mut tables);
        }
    }
    flush(&mut current_rows, &mut tables);

    tables
}

fn build_table(rows: Vec<Vec<String>>, page_number: u32, table_id: &str) -> Option<TableBlock> {
    if rows.len() < 2 {
        return None;
    }

    let mut headers = vec![rows[0].clone()];
    let mut data_start = 1;

    // A mostly non-numeric second row is a continuation of the header.
    if rows.len() > 2 {
        let second = &rows[1];
        let numeric_count = second
            .iter()
            .filter(|cell| cell.chars().any(|c| c.is_ascii_digit()))
            .count();
        if numeric_count < second.len().div_ceil(2) {
            headers.push(second.clone());
            data_start = 2;
        }
    }

    let data: Vec<Vec<String>> = rows[data_start..].to_vec();
    if data.is_empty() {
        return None;
    }

    let metadata = detect_table_metadata(&headers, &data);
    Some(TableBlock::new(
        table_id.to_string(),
        page_number,
        headers,
        data,
        metadata,
    ))
}

/// Extract per-page text with lopdf, tolerating per-page extraction failures.
pub(crate) fn load_page_texts(path: &Path) -> Result<Vec<(u32, String)>> {
    let doc = lopdf::Document::load(path).map_err(|e| {
        crate::error::ExtractionError::BackendFailure {
            backend: "lopdf".to_string(),
            message: e.to_string(),
        }
    })?;

    let mut pages = Vec::new();
    for (page_number, _) in doc.get_pages() {
        match doc.extract_text(&[page_number]) {
            Ok(text) => pages.push((page_number, text)),
            Err(e) => {
                warn!("lopdf failed to extract text for page {page_number}: {e}");
                pages.push((page_number, String::new()));
            }
        }
    }

    Ok(pages)
}
