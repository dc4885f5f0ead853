use chrono::Utc;
use log::{debug, info};
use regex::Regex;
use rust_decimal::Decimal;

use crate::periods::{LabelStandardizer, ParsedPeriod, PeriodParser};
use crate::schema::{
    CandidateSource, CandidateValue, Evidence, Scale, Section, SectionType, TableBlock, TextBlock,
};

/// A numeric cell or snippet resolved to an exact decimal with any unit
/// markers found alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNumericValue {
    pub value: Decimal,
    pub currency: Option<String>,
    pub scale: Option<Scale>,
}

/// Parses the numeric formats financial tables print: currency-prefixed,
/// scale-suffixed, parenthesized (negative) and plain numbers.
pub struct NumericValueParser {
    value_patterns: Vec<Regex>,
    currency_patterns: Vec<(&'static str, Regex)>,
    scale_patterns: Vec<(Scale, Regex)>,
}

impl Default for NumericValueParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NumericValueParser {
    pub fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("value pattern must compile");

        Self {
            // Tried in order; first match wins.
            value_patterns: vec![
                compile(r"(?:£|GBP|\$|USD|€|EUR)\s*([\d,]+(?:\.\d+)?)"),
                compile(r"(?i)([\d,]+(?:\.\d+)?)\s*(?:million|mn|m|billion|bn|b|thousand|k)\b"),
                compile(r"\(\s*([\d,]+(?:\.\d+)?)\s*\)"),
                compile(r"([\d,]+(?:\.\d+)?)"),
            ],
            currency_patterns: vec![
                ("GBP", compile(r"(?i)(?:£|GBP|pounds?)")),
                ("USD", compile(r"(?i)(?:\$|USD|dollars?)")),
                ("EUR", compile(r"(?i)(?:€|EUR|euros?)")),
            ],
            scale_patterns: vec![
                (Scale::Millions, compile(r"(?i)(?:million|mn|m\b)")),
                (Scale::Billions, compile(r"(?i)(?:billion|bn|b\b)")),
                (Scale::Thousands, compile(r"(?i)(?:thousand|k\b)")),
            ],
        }
    }

    /// Parse a cell or snippet. Parenthesized numbers come back negative.
    pub fn parse(&self, raw: &str) -> Option<ParsedNumericValue> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let currency = self
            .currency_patterns
            .iter()
            .find(|(_, pattern)| pattern.is_match(raw))
            .map(|(code, _)| code.to_string());

        let scale = self
            .scale_patterns
            .iter()
            .find(|(_, pattern)| pattern.is_match(raw))
            .map(|(scale, _)| *scale);

        let is_negative = raw.contains('(') && raw.contains(')');

        for pattern in &self.value_patterns {
            let Some(caps) = pattern.captures(raw) else {
                continue;
            };
            let digits = caps[1].replace(',', "");
            let Ok(mut value) = digits.parse::<Decimal>() else {
                continue;
            };
            if is_negative {
                value = -value;
            }
            return Some(ParsedNumericValue {
                value,
                currency,
                scale,
            });
        }

        None
    }
}

/// Emits candidate metric values from table cells (primary) and narrative
/// text (secondary), with provenance and an evidence-based score.
pub struct CandidateGenerator {
    period_parser: PeriodParser,
    label_standardizer: LabelStandardizer,
    value_parser: NumericValueParser,
    text_patterns: Vec<Regex>,
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateGenerator {
    pub fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("text pattern must compile");

        Self {
            period_parser: PeriodParser::new(),
            label_standardizer: LabelStandardizer::new(),
            value_parser: NumericValueParser::new(),
            text_patterns: vec![
                // "Revenue was £1,250.5 million"
                compile(
                    r"(?i)([A-Za-z][A-Za-z\s]+?)\s+(?:was|is|of|:)\s+([£$€]?[\d,]+(?:\.\d+)?)\s*(million|billion|thousand)?",
                ),
                // "£1,250.5 million revenue"
                compile(
                    r"(?i)([£$€]?[\d,]+(?:\.\d+)?)\s*(million|billion|thousand)?\s+([A-Za-z][A-Za-z\s]+)",
                ),
            ],
        }
    }

    pub fn value_parser(&self) -> &NumericValueParser {
        &self.value_parser
    }

    /// Generate scored candidates from every source, sorted by confidence
    /// descending. Emission is stable for a fixed input.
    pub fn generate_candidates(
        &self,
        sections: &[Section],
        table_blocks: &[TableBlock],
        text_blocks: &[TextBlock],
    ) -> Vec<CandidateValue> {
        let mut next_id = 0usize;
        let mut candidates = Vec::new();

        for section in sections {
            for table in table_blocks
                .iter()
                .filter(|t| section.contains_page(t.page_number))
            {
                self.extract_from_table(table, section, &mut candidates, &mut next_id);
            }
        }
        let from_tables = candidates.len();

        for section in sections {
            for block in text_blocks
                .iter()
                .filter(|b| section.contains_page(b.page_number))
            {
                self.extract_from_text_block(block, section, &mut candidates, &mut next_id);
            }
        }

        for candidate in &mut candidates {
            candidate.confidence_score = score_candidate(candidate);
        }
        candidates.sort_by(|a, b| b.confidence_score.total_cmp(&a.confidence_score));

        info!(
            "generated {} candidates ({} from tables, {} from text)",
            candidates.len(),
            from_tables,
            candidates.len() - from_tables
        );

        candidates
    }

    fn extract_from_table(
        &self,
        table: &TableBlock,
        section: &Section,
        candidates: &mut Vec<CandidateValue>,
        next_id: &mut usize,
    ) {
        let Some(header_row) = table.headers.first() else {
            return;
        };

        let period_columns = self.detect_period_columns(header_row);
        if period_columns.is_empty() {
            debug!("table {} has no parseable period columns", table.table_id);
            return;
        }

        const LABEL_COLUMN: usize = 0;

        for (row_idx, row) in table.data.iter().enumerate() {
            let Some(raw_label) = row.get(LABEL_COLUMN) else {
                continue;
            };
            let raw_label = raw_label.trim();
            if raw_label.is_empty() {
                continue;
            }

            let metric_name = self.label_standardizer.standardize(raw_label);

            for (col_idx, period) in &period_columns {
                let Some(cell) = row.get(*col_idx) else {
                    continue;
                };
                let Some(parsed) = self.value_parser.parse(cell) else {
                    continue;
                };

                candidates.push(CandidateValue {
                    candidate_id: allocate_id(next_id),
                    metric_name: metric_name.clone(),
                    value: parsed.value,
                    currency: parsed.currency.unwrap_or_else(|| "GBP".to_string()),
                    scale: parsed.scale.unwrap_or(Scale::Millions),
                    period_end_date: Some(period.end_date),
                    section_type: section.section_type,
                    source: CandidateSource::TableCell,
                    confidence_score: 0.0,
                    evidence: Evidence {
                        table_id: Some(table.table_id.clone()),
                        row_index: Some(row_idx),
                        column_index: Some(*col_idx),
                        raw_label: Some(raw_label.to_string()),
                        raw_value: Some(cell.clone()),
                        period_label: Some(period.original_label.clone()),
                        section_id: Some(section.section_id.clone()),
                        ..Evidence::default()
                    },
                    extraction_timestamp: Utc::now(),
                });
            }
        }
    }

    fn extract_from_text_block(
        &self,
        block: &TextBlock,
        section: &Section,
        candidates: &mut Vec<CandidateValue>,
        next_id: &mut usize,
    ) {
        for pattern in &self.text_patterns {
            for caps in pattern.captures_iter(&block.text) {
                let mut raw_label = None;
                let mut raw_value = None;
                let mut scale = None;

                for group in caps.iter().skip(1).flatten() {
                    let text = group.as_str().trim();
                    if text.is_empty() {
                        continue;
                    }
                    if text.chars().any(|c| c.is_ascii_digit()) {
                        raw_value = Some(text);
                    } else if let Some(parsed_scale) = word_scale(text) {
                        scale = Some(parsed_scale);
                    } else {
                        raw_label = Some(text);
                    }
                }

                let (Some(raw_label), Some(raw_value)) = (raw_label, raw_value) else {
                    continue;
                };

                // Loose patterns hit a lot of noise; only labels that resolve
                // to a canonical metric are worth emitting.
                if !self.label_standardizer.is_known(raw_label) {
                    continue;
                }
                let metric_name = self.label_standardizer.standardize(raw_label);

                let Some(parsed) = self.value_parser.parse(raw_value) else {
                    continue;
                };

                candidates.push(CandidateValue {
                    candidate_id: allocate_id(next_id),
                    metric_name,
                    value: parsed.value,
                    currency: parsed.currency.unwrap_or_else(|| "GBP".to_string()),
                    scale: scale.or(parsed.scale).unwrap_or(Scale::Millions),
                    period_end_date: None,
                    section_type: section.section_type,
                    source: CandidateSource::TextBlock,
                    confidence_score: 0.0,
                    evidence: Evidence {
                        block_id: Some(block.block_id.clone()),
                        page: Some(block.page_number),
                        raw_label: Some(raw_label.to_string()),
                        raw_text: Some(caps[0].to_string()),
                        section_id: Some(section.section_id.clone()),
                        ..Evidence::default()
                    },
                    extraction_timestamp: Utc::now(),
                });
            }
        }
    }

    /// Header cells that parse as period labels define the period axis.
    fn detect_period_columns(&self, header_row: &[String]) -> Vec<(usize, ParsedPeriod)> {
        header_row
            .iter()
            .enumerate()
            .filter_map(|(col_idx, cell)| {
                self.period_parser
                    .parse_period_label(cell)
                    .map(|parsed| (col_idx, parsed))
            })
            .collect()
    }
}

fn allocate_id(next_id: &mut usize) -> String {
    let id = format!("cand_{next_id:04}");
    *next_id += 1;
    id
}

fn word_scale(word: &str) -> Option<Scale> {
    match word.to_lowercase().as_str() {
        "thousand" => Some(Scale::Thousands),
        "million" => Some(Scale::Millions),
        "billion" => Some(Scale::Billions),
        _ => None,
    }
}

/// Additive confidence score in `[0, 1]`.
fn score_candidate(candidate: &CandidateValue) -> f64 {
    let mut score = match candidate.source {
        CandidateSource::TableCell => 0.40,
        CandidateSource::TextBlock => 0.20,
    };

    score += match candidate.section_type {
        SectionType::IncomeStatement | SectionType::BalanceSheet | SectionType::CashFlow => 0.20,
        _ => 0.10,
    };

    if candidate.period_end_date.is_some() {
        score += 0.20;
    }

    score += (0.03 * candidate.evidence.populated_field_count() as f64).min(0.20);

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use crate::schema::{BlockType, DetectionMethod, TableMetadata};

    fn section(section_type: SectionType, start: u32, end: u32) -> Section {
        Section {
            section_id: format!("section_{section_type}_{start}"),
            section_type,
            section_name: section_type.to_string(),
            start_page: start,
            end_page: end,
            confidence: 0.9,
            detection_method: DetectionMethod::Regex,
        }
    }

    fn table(page: u32, headers: Vec<Vec<&str>>, data: Vec<Vec<&str>>) -> TableBlock {
        TableBlock::new(
            format!("table_{page}_0"),
            page,
            headers
                .into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect(),
            data.into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect(),
            TableMetadata::default(),
        )
    }

    #[test]
    fn test_parse_currency_prefixed_number() {
        let parser = NumericValueParser::new();
        let parsed = parser.parse("£1,250.5m").unwrap();
        assert_eq!(parsed.value, dec!(1250.5));
        assert_eq!(parsed.currency.as_deref(), Some("GBP"));
        assert_eq!(parsed.scale, Some(Scale::Millions));
    }

    #[test]
    fn test_parse_scale_suffixed_number() {
        let parser = NumericValueParser::new();
        let parsed = parser.parse("3.2bn").unwrap();
        assert_eq!(parsed.value, dec!(3.2));
        assert_eq!(parsed.scale, Some(Scale::Billions));
        assert_eq!(parsed.currency, None);
    }

    #[test]
    fn test_parse_parenthesized_number_is_negative() {
        let parser = NumericValueParser::new();
        let parsed = parser.parse("(250.5)").unwrap();
        assert_eq!(parsed.value, dec!(-250.5));
        assert!(parsed.value < Decimal::ZERO);
    }

    #[test]
    fn test_parse_plain_number_strips_commas() {
        let parser = NumericValueParser::new();
        let parsed = parser.parse("1,100.2").unwrap();
        assert_eq!(parsed.value, dec!(1100.2));
        assert_eq!(parsed.currency, None);
        assert_eq!(parsed.scale, None);
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        let parser = NumericValueParser::new();
        assert!(parser.parse("").is_none());
        assert!(parser.parse("n/a").is_none());
        assert!(parser.parse("-").is_none());
    }

    #[test]
    fn test_table_candidates_with_periods_and_signs() {
        let generator = CandidateGenerator::new();
        let sections = vec![section(SectionType::IncomeStatement, 1, 2)];
        let tables = vec![table(
            1,
            vec![vec!["", "2023", "2022"]],
            vec![
                vec!["Revenue", "1,250.5", "1,100.2"],
                vec!["Operating expenses", "(250.5)", "(230.1)"],
            ],
        )];

        let candidates = generator.generate_candidates(&sections, &tables, &[]);
        assert_eq!(candidates.len(), 4);

        let opex_2023 = candidates
            .iter()
            .find(|c| {
                c.metric_name == "operating_expenses"
                    && c.period_end_date == NaiveDate::from_ymd_opt(2023, 12, 31)
            })
            .unwrap();
        assert_eq!(opex_2023.value, dec!(-250.5));
        assert_eq!(opex_2023.scale, Scale::Millions);
        assert_eq!(opex_2023.currency, "GBP");
        assert_eq!(opex_2023.source, CandidateSource::TableCell);
        assert_eq!(opex_2023.evidence.raw_value.as_deref(), Some("(250.5)"));
        assert_eq!(opex_2023.evidence.period_label.as_deref(), Some("2023"));

        let revenue_2022 = candidates
            .iter()
            .find(|c| {
                c.metric_name == "revenue"
                    && c.period_end_date == NaiveDate::from_ymd_opt(2022, 12, 31)
            })
            .unwrap();
        assert_eq!(revenue_2022.value, dec!(1100.2));
    }

    #[test]
    fn test_tables_outside_section_pages_are_ignored() {
        let generator = CandidateGenerator::new();
        let sections = vec![section(SectionType::IncomeStatement, 1, 2)];
        let tables = vec![table(
            7,
            vec![vec!["", "2023"]],
            vec![vec!["Revenue", "1,250.5"]],
        )];

        let candidates = generator.generate_candidates(&sections, &tables, &[]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_text_path_emits_known_labels() {
        let generator = CandidateGenerator::new();
        let sections = vec![section(SectionType::Notes, 4, 4)];
        let blocks = vec![TextBlock {
            block_id: "b1".to_string(),
            text: "Revenue was £1,250.5 million in the period.".to_string(),
            page_number: 4,
            block_type: BlockType::Body,
            bbox: None,
            font_info: None,
        }];

        let candidates = generator.generate_candidates(&sections, &[], &blocks);
        let revenue = candidates.iter().find(|c| c.metric_name == "revenue").unwrap();
        assert_eq!(revenue.value, dec!(1250.5));
        assert_eq!(revenue.scale, Scale::Millions);
        assert_eq!(revenue.currency, "GBP");
        assert_eq!(revenue.source, CandidateSource::TextBlock);
        assert_eq!(revenue.evidence.block_id.as_deref(), Some("b1"));
        assert!(revenue.period_end_date.is_none());
    }

    #[test]
    fn test_text_path_ignores_unknown_labels() {
        let generator = CandidateGenerator::new();
        let sections = vec![section(SectionType::Notes, 4, 4)];
        let blocks = vec![TextBlock {
            block_id: "b1".to_string(),
            text: "Headcount was 1,250 at year end.".to_string(),
            page_number: 4,
            block_type: BlockType::Body,
            bbox: None,
            font_info: None,
        }];

        let candidates = generator.generate_candidates(&sections, &[], &blocks);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_scoring_prefers_table_candidates() {
        let generator = CandidateGenerator::new();
        let sections = vec![
            section(SectionType::IncomeStatement, 1, 1),
            section(SectionType::Notes, 2, 2),
        ];
        let tables = vec![table(
            1,
            vec![vec!["", "2023"]],
            vec![vec!["Revenue", "1,250.5"]],
        )];
        let blocks = vec![TextBlock {
            block_id: "b1".to_string(),
            text: "Revenue was £1,250.5 million.".to_string(),
            page_number: 2,
            block_type: BlockType::Body,
            bbox: None,
            font_info: None,
        }];

        let candidates = generator.generate_candidates(&sections, &tables, &blocks);
        assert!(candidates.len() >= 2);
        // Sorted descending: the table-path candidate leads.
        assert_eq!(candidates[0].source, CandidateSource::TableCell);
        assert!(candidates[0].confidence_score > candidates[1].confidence_score);
        assert!(candidates.iter().all(|c| (0.0..=1.0).contains(&c.confidence_score)));
    }
}
