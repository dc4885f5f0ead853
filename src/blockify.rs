use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, Result};
use crate::parsers::{build_adapters, PdfParser};
use crate::schema::{TableBlock, TextBlock};

struct AdapterRun {
    name: &'static str,
    specialist: bool,
    outcome: Result<(Vec<TextBlock>, Vec<TableBlock>)>,
}

/// Runs the configured parser adapters and merges their block streams.
pub struct BlockificationService {
    adapters: Vec<Arc<dyn PdfParser>>,
    parallel: bool,
    timeout: Duration,
}

impl BlockificationService {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_adapters(
            build_adapters(&config.parser_priority),
            config.performance.parallel_processing,
            Duration::from_secs(config.parser_timeout_secs),
        )
    }

    pub fn with_adapters(
        adapters: Vec<Arc<dyn PdfParser>>,
        parallel: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            parallel,
            timeout,
        }
    }

    async fn run_adapter(
        adapter: Arc<dyn PdfParser>,
        path: PathBuf,
        timeout: Duration,
    ) -> AdapterRun {
        let name = adapter.name();
        let specialist = adapter.is_table_specialist();

        let handle = tokio::task::spawn_blocking(move || adapter.parse(&path));
        let outcome = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ExtractionError::BackendFailure {
                backend: name.to_string(),
                message: join_error.to_string(),
            }),
            Err(_) => Err(ExtractionError::BackendFailure {
                backend: name.to_string(),
                message: format!("timed out after {timeout:?}"),
            }),
        };

        AdapterRun {
            name,
            specialist,
            outcome,
        }
    }

    async fn run_all(&self, path: &Path) -> Vec<AdapterRun> {
        if self.parallel {
            let futures: Vec<_> = self
                .adapters
                .iter()
                .map(|adapter| Self::run_adapter(Arc::clone(adapter), path.to_path_buf(), self.timeout))
                .collect();
            join_all(futures).await
        } else {
            let mut runs = Vec::with_capacity(self.adapters.len());
            for adapter in &self.adapters {
                runs.push(
                    Self::run_adapter(Arc::clone(adapter), path.to_path_buf(), self.timeout).await,
                );
            }
            runs
        }
    }

    /// Parse with every adapter and merge by policy: text from the first
    /// succeeding non-specialist adapter, tables deduplicated across all
    /// succeeding adapters with specialists inserted first.
    pub async fn parse(&self, path: &Path) -> (Vec<TextBlock>, Vec<TableBlock>) {
        let runs = self.run_all(path).await;

        for run in &runs {
            match &run.outcome {
                Ok((text, tables)) => info!(
                    "adapter {} succeeded: {} text blocks, {} tables",
                    run.name,
                    text.len(),
                    tables.len()
                ),
                Err(e) => warn!("adapter {} failed: {e}", run.name),
            }
        }

        merge_runs(runs)
    }

    /// Fallback mode: try adapters in priority order and return the first
    /// successful result.
    pub async fn parse_with_fallback(
        &self,
        path: &Path,
    ) -> Result<(Vec<TextBlock>, Vec<TableBlock>)> {
        for adapter in &self.adapters {
            let run =
                Self::run_adapter(Arc::clone(adapter), path.to_path_buf(), self.timeout).await;
            match run.outcome {
                Ok(result) => {
                    info!("fallback mode succeeded with adapter {}", run.name);
                    return Ok(result);
                }
                Err(e) => warn!("fallback adapter {} failed: {e}", run.name),
            }
        }

        Err(ExtractionError::InputInvalid(format!(
            "all parser backends failed for {}",
            path.display()
        )))
    }
}

fn merge_runs(runs: Vec<AdapterRun>) -> (Vec<TextBlock>, Vec<TableBlock>) {
    // Text: first succeeding adapter, in priority order, that produces text.
    let mut text_blocks = Vec::new();
    for run in &runs {
        if run.specialist {
            continue;
        }
        if let Ok((text, _)) = &run.outcome {
            text_blocks = text.clone();
            debug!("using text from adapter {}", run.name);
            break;
        }
    }

    // Tables: specialists first, then others if not similar to an existing
    // table on the same page.
    let mut tables_by_page: BTreeMap<u32, Vec<TableBlock>> = BTreeMap::new();

    let mut insert = |table: &TableBlock, dedup: bool| {
        let page_tables = tables_by_page.entry(table.page_number).or_default();
        if dedup
            && page_tables
                .iter()
                .any(|existing| tables_similar(existing, table))
        {
            debug!("duplicate table {} skipped", table.table_id);
            return;
        }
        page_tables.push(table.clone());
    };

    for run in &runs {
        if !run.specialist {
            continue;
        }
        if let Ok((_, tables)) = &run.outcome {
            for table in tables {
                insert(table, false);
            }
        }
    }

    for run in &runs {
        if run.specialist {
            continue;
        }
        if let Ok((_, tables)) = &run.outcome {
            for table in tables {
                insert(table, true);
            }
        }
    }

    let table_blocks: Vec<TableBlock> = tables_by_page.into_values().flatten().collect();

    (text_blocks, table_blocks)
}

/// Two tables on the same page are considered the same physical table when
/// their shapes are close and their first data cells match.
pub fn tables_similar(a: &TableBlock, b: &TableBlock) -> bool {
    if a.page_number != b.page_number {
        return false;
    }

    let row_delta = a.row_count().abs_diff(b.row_count());
    let col_delta = a.column_count().abs_diff(b.column_count());
    if row_delta > 2 || col_delta > 1 {
        return false;
    }

    match (a.first_data_cell(), b.first_data_cell()) {
        (Some(cell_a), Some(cell_b)) => {
            !cell_a.is_empty() && !cell_b.is_empty() && cell_a == cell_b
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableMetadata;

    fn table(id: &str, page: u32, first_cell: &str, rows: usize, cols: usize) -> TableBlock {
        let mut data = Vec::new();
        for r in 0..rows {
            let mut row = vec![String::new(); cols];
            if r == 0 {
                row[0] = first_cell.to_string();
            }
            data.push(row);
        }
        TableBlock::new(
            id.to_string(),
            page,
            vec![vec![String::new(); cols]],
            data,
            TableMetadata::default(),
        )
    }

    struct StaticParser {
        name: &'static str,
        specialist: bool,
        text: Vec<TextBlock>,
        tables: Vec<TableBlock>,
        fail: bool,
    }

    impl PdfParser for StaticParser {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_table_specialist(&self) -> bool {
            self.specialist
        }

        fn parse(&self, _path: &Path) -> Result<(Vec<TextBlock>, Vec<TableBlock>)> {
            if self.fail {
                return Err(ExtractionError::BackendFailure {
                    backend: self.name.to_string(),
                    message: "synthetic failure".to_string(),
                });
            }
            Ok((self.text.clone(), self.tables.clone()))
        }
    }

    fn text_block(id: &str, page: u32) -> TextBlock {
        TextBlock {
            block_id: id.to_string(),
            text: "Revenue was strong.".to_string(),
            page_number: page,
            block_type: crate::schema::BlockType::Body,
            bbox: None,
            font_info: None,
        }
    }

    #[test]
    fn test_tables_similar_rule() {
        let a = table("a", 3, "Revenue", 5, 3);
        let b = table("b", 3, "Revenue", 6, 3);
        assert!(tables_similar(&a, &b));

        // Shape too different.
        let c = table("c", 3, "Revenue", 9, 3);
        assert!(!tables_similar(&a, &c));

        // First cell differs.
        let d = table("d", 3, "Cost of sales", 5, 3);
        assert!(!tables_similar(&a, &d));

        // Different page.
        let e = table("e", 4, "Revenue", 5, 3);
        assert!(!tables_similar(&a, &e));

        // Empty first cells never match.
        let f = table("f", 3, "", 5, 3);
        let g = table("g", 3, "", 5, 3);
        assert!(!tables_similar(&f, &g));
    }

    #[tokio::test]
    async fn test_merge_prefers_specialist_tables_and_dedups() {
        let specialist_table = table("specialist_1", 3, "Revenue", 5, 3);
        let duplicate = table("layout_1", 3, "Revenue", 5, 3);
        let distinct = table("layout_2", 3, "Net assets", 4, 2);

        let service = BlockificationService::with_adapters(
            vec![
                Arc::new(StaticParser {
                    name: "dense_text",
                    specialist: false,
                    text: vec![text_block("t1", 1)],
                    tables: vec![],
                    fail: false,
                }),
                Arc::new(StaticParser {
                    name: "layout",
                    specialist: false,
                    text: vec![text_block("t2", 1), text_block("t3", 2)],
                    tables: vec![duplicate, distinct],
                    fail: false,
                }),
                Arc::new(StaticParser {
                    name: "table_specialist",
                    specialist: true,
                    text: vec![],
                    tables: vec![specialist_table],
                    fail: false,
                }),
            ],
            false,
            Duration::from_secs(5),
        );

        let (text, tables) = service.parse(Path::new("unused.pdf")).await;

        // Text comes from the first succeeding non-specialist adapter.
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].block_id, "t1");

        // The specialist's copy wins; the distinct layout table survives.
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].table_id, "specialist_1");
        assert_eq!(tables[1].table_id, "layout_2");
    }

    #[tokio::test]
    async fn test_text_falls_back_when_first_adapter_fails() {
        let service = BlockificationService::with_adapters(
            vec![
                Arc::new(StaticParser {
                    name: "dense_text",
                    specialist: false,
                    text: vec![text_block("a", 1)],
                    tables: vec![],
                    fail: true,
                }),
                Arc::new(StaticParser {
                    name: "layout",
                    specialist: false,
                    text: vec![text_block("b", 1)],
                    tables: vec![],
                    fail: false,
                }),
            ],
            true,
            Duration::from_secs(5),
        );

        let (text, _) = service.parse(Path::new("unused.pdf")).await;
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].block_id, "b");
    }

    #[tokio::test]
    async fn test_fallback_mode_returns_first_success() {
        let service = BlockificationService::with_adapters(
            vec![
                Arc::new(StaticParser {
                    name: "dense_text",
                    specialist: false,
                    text: vec![],
                    tables: vec![],
                    fail: true,
                }),
                Arc::new(StaticParser {
                    name: "layout",
                    specialist: false,
                    text: vec![text_block("b", 1)],
                    tables: vec![],
                    fail: false,
                }),
            ],
            false,
            Duration::from_secs(5),
        );

        let (text, _) = service
            .parse_with_fallback(Path::new("unused.pdf"))
            .await
            .unwrap();
        assert_eq!(text[0].block_id, "b");
    }

    #[tokio::test]
    async fn test_fallback_mode_errors_when_all_fail() {
        let service = BlockificationService::with_adapters(
            vec![Arc::new(StaticParser {
                name: "dense_text",
                specialist: false,
                text: vec![],
                tables: vec![],
                fail: true,
            })],
            false,
            Duration::from_secs(5),
        );

        let result = service.parse_with_fallback(Path::new("unused.pdf")).await;
        assert!(matches!(result, Err(ExtractionError::InputInvalid(_))));
    }
}
