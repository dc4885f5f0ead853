use std::path::Path;

use log::{info, warn};

use crate::error::{ExtractionError, Result};
use crate::schema::{TableBlock, TextBlock};

use super::{classify_text_block, split_paragraphs, PdfParser};

/// Adapter-A: dense text extraction via the `pdf-extract` backend.
///
/// Strong at narrative text, weak at tables (emits none).
pub struct DenseTextParser;

impl DenseTextParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DenseTextParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfParser for DenseTextParser {
    fn name(&self) -> &'static str {
        "dense_text"
    }

    fn parse(&self, path: &Path) -> Result<(Vec<TextBlock>, Vec<TableBlock>)> {
        let pages = pdf_extract::extract_text_by_pages(path).map_err(|e| {
            warn!("pdf-extract failed on {}: {e}", path.display());
            ExtractionError::BackendFailure {
                backend: "pdf-extract".to_string(),
                message: e.to_string(),
            }
        })?;

        let mut text_blocks = Vec::new();
        for (page_idx, page_text) in pages.iter().enumerate() {
            let page_number = page_idx as u32 + 1;
            for (para_idx, paragraph) in split_paragraphs(page_text).into_iter().enumerate() {
                let block_type = classify_text_block(&paragraph, None);
                text_blocks.push(TextBlock {
                    block_id: format!("dense_text_{page_number}_{para_idx}"),
                    text: paragraph,
                    page_number,
                    block_type,
                    bbox: None,
                    font_info: None,
                });
            }
        }

        info!(
            "dense_text parsed {} text blocks from {}",
            text_blocks.len(),
            path.display()
        );

        Ok((text_blocks, Vec::new()))
    }
}
