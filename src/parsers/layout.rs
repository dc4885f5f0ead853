use std::path::Path;

use log::info;
use regex::Regex;

use crate::error::Result;
use crate::schema::{TableBlock, TextBlock};

use super::{classify_text_block, load_page_texts, split_paragraphs, tables_from_lines, PdfParser};

/// Adapter-B: balanced text and table extraction via the `lopdf` backend.
///
/// Text is split on blank-line paragraphs; tables are reconstructed from
/// whitespace-aligned line runs.
pub struct LayoutParser {
    column_gap: Regex,
}

impl LayoutParser {
    pub fn new() -> Self {
        Self {
            column_gap: Regex::new(r" {2,}|\t").expect("column pattern must compile"),
        }
    }

    fn split_columns(&self, line: &str) -> Vec<String> {
        self.column_gap
            .split(line.trim())
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for LayoutParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfParser for LayoutParser {
    fn name(&self) -> &'static str {
        "layout"
    }

    fn parse(&self, path: &Path) -> Result<(Vec<TextBlock>, Vec<TableBlock>)> {
        let pages = load_page_texts(path)?;

        let mut text_blocks = Vec::new();
        let mut table_blocks = Vec::new();

        for (page_number, page_text) in &pages {
            for (para_idx, paragraph) in split_paragraphs(page_text).into_iter().enumerate() {
                let block_type = classify_text_block(&paragraph, None);
                text_blocks.push(TextBlock {
                    block_id: format!("layout_{page_number}_{para_idx}"),
                    text: paragraph,
                    page_number: *page_number,
                    block_type,
                    bbox: None,
                    font_info: None,
                });
            }

            table_blocks.extend(tables_from_lines(page_text, *page_number, "layout", |line| {
                self.split_columns(line)
            }));
        }

        info!(
            "layout parsed {} text blocks and {} tables from {}",
            text_blocks.len(),
            table_blocks.len(),
            path.display()
        );

        Ok((text_blocks, table_blocks))
    }
}
