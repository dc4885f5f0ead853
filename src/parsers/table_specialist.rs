use std::path::Path;

use log::{debug, info};
use regex::Regex;

use crate::error::Result;
use crate::schema::{TableBlock, TextBlock};

use super::{load_page_texts, tables_from_lines, PdfParser};

/// Table reconstruction flavor, mirroring bordered vs borderless layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// Rows carry explicit column delimiters (`|` or tabs).
    BorderedLine,
    /// Columns are inferred from whitespace runs.
    WhitespaceStream,
}

/// Adapter-C: table specialist over the `lopdf` backend.
///
/// Contributes no text. The bordered-line flavor is always tried first; when
/// it yields nothing the page is retried with the whitespace-stream flavor.
pub struct TableSpecialistParser {
    whitespace_gap: Regex,
}

impl TableSpecialistParser {
    pub fn new() -> Self {
        Self {
            whitespace_gap: Regex::new(r" {2,}").expect("column pattern must compile"),
        }
    }

    fn split_row(&self, line: &str, flavor: Flavor) -> Vec<String> {
        let trimmed = line.trim();
        match flavor {
            Flavor::BorderedLine => {
                if !trimmed.contains('|') && !trimmed.contains('\t') {
                    return Vec::new();
                }
                trimmed
                    .split(['|', '\t'])
                    .map(str::trim)
                    .filter(|cell| !cell.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            Flavor::WhitespaceStream => self
                .whitespace_gap
                .split(trimmed)
                .map(str::trim)
                .filter(|cell| !cell.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    fn extract_with_flavor(
        &self,
        pages: &[(u32, String)],
        flavor: Flavor,
    ) -> Vec<TableBlock> {
        let prefix = match flavor {
            Flavor::BorderedLine => "specialist_bordered",
            Flavor::WhitespaceStream => "specialist_stream",
        };

        let mut tables = Vec::new();
        for (page_number, page_text) in pages {
            tables.extend(tables_from_lines(page_text, *page_number, prefix, |line| {
                self.split_row(line, flavor)
            }));
        }
        tables
    }
}

impl Default for TableSpecialistParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfParser for TableSpecialistParser {
    fn name(&self) -> &'static str {
        "table_specialist"
    }

    fn is_table_specialist(&self) -> bool {
        true
    }

    fn parse(&self, path: &Path) -> Result<(Vec<TextBlock>, Vec<TableBlock>)> {
        let pages = load_page_texts(path)?;

        let mut tables = self.extract_with_flavor(&pages, Flavor::BorderedLine);
        if tables.is_empty() {
            debug!("bordered-line flavor found no tables, retrying with whitespace-stream");
            tables = self.extract_with_flavor(&pages, Flavor::WhitespaceStream);
        }

        info!(
            "table_specialist parsed {} tables from {}",
            tables.len(),
            path.display()
        );

        Ok((Vec::new(), tables))
    }
}
