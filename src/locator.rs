use log::{debug, info, warn};
use regex::Regex;

use crate::config::SectionDetectionConfig;
use crate::schema::{DetectionMethod, Section, SectionType, TextBlock};

/// Registry of header patterns keyed by section type.
///
/// Registry order doubles as match priority: the first matching type wins when
/// a header matches several.
pub struct SectionPatterns {
    patterns: Vec<(SectionType, Vec<Regex>)>,
}

impl Default for SectionPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionPatterns {
    pub fn new() -> Self {
        let table: &[(SectionType, &[&str])] = &[
            (
                SectionType::IncomeStatement,
                &[
                    r"(?i)consolidated\s+income\s+statement",
                    r"(?i)income\s+statement",
                    r"(?i)statement\s+of\s+comprehensive\s+income",
                    r"(?i)statement\s+of\s+income",
                    r"(?i)profit\s+and\s+loss\s+statement",
                    r"(?i)profit\s+&\s+loss\s+statement",
                    r"(?i)p\s*&\s*l\s+statement",
                    r"(?i)statement\s+of\s+profit\s+or\s+loss",
                    r"(?i)consolidated\s+statement\s+of\s+operations",
                ],
            ),
            (
                SectionType::CashFlow,
                &[
                    r"(?i)consolidated\s+cash\s+flow\s+statement",
                    r"(?i)cash\s+flow\s+statement",
                    r"(?i)statement\s+of\s+cash\s+flows",
                    r"(?i)consolidated\s+statement\s+of\s+cash\s+flows",
                    r"(?i)cashflow\s+statement",
                ],
            ),
            (
                SectionType::BalanceSheet,
                &[
                    r"(?i)consolidated\s+balance\s+sheet",
                    r"(?i)balance\s+sheet",
                    r"(?i)statement\s+of\s+financial\s+position",
                    r"(?i)consolidated\s+statement\s+of\s+financial\s+position",
                    r"(?i)statement\s+of\s+assets",
                ],
            ),
            (
                SectionType::Borrowings,
                &[
                    r"(?i)borrowings",
                    r"(?i)debt\s+and\s+borrowings",
                    r"(?i)loans\s+and\s+borrowings",
                    r"(?i)financial\s+liabilities",
                    r"(?i)long[\s-]?term\s+debt",
                    r"(?i)bank\s+loans",
                ],
            ),
            (
                SectionType::Notes,
                &[
                    r"(?i)notes\s+to\s+the\s+financial\s+statements",
                    r"(?i)notes\s+to\s+financial\s+statements",
                    r"(?i)notes\s+to\s+the\s+accounts",
                    r"(?i)notes\s+to\s+accounts",
                    r"(?i)accounting\s+policies",
                ],
            ),
            (
                SectionType::Revenue,
                &[
                    r"(?i)revenue",
                    r"(?i)turnover",
                    r"(?i)sales\s+revenue",
                    r"(?i)net\s+sales",
                    r"(?i)total\s+revenue",
                ],
            ),
            (
                SectionType::Ebitda,
                &[
                    r"(?i)EBITDA",
                    r"(?i)earnings\s+before\s+interest,?\s+tax",
                    r"(?i)operating\s+profit\s+before",
                    r"(?i)adjusted\s+EBITDA",
                ],
            ),
        ];

        let patterns = table
            .iter()
            .map(|(section_type, sources)| {
                let compiled = sources
                    .iter()
                    .map(|p| Regex::new(p).expect("section pattern must compile"))
                    .collect();
                (*section_type, compiled)
            })
            .collect();

        Self { patterns }
    }

    /// All section types the text matches, in registry order.
    pub fn match_section_types(&self, text: &str) -> Vec<SectionType> {
        let mut matches = Vec::new();
        for (section_type, patterns) in &self.patterns {
            if patterns.iter().any(|p| p.is_match(text)) {
                matches.push(*section_type);
            }
        }
        matches
    }

    /// Whether the text plausibly is a section header.
    pub fn is_section_header(&self, text: &str) -> bool {
        if text.len() > 200 {
            return false;
        }

        if !self.match_section_types(text).is_empty() {
            return true;
        }

        let trimmed = text.trim();
        if is_all_upper(trimmed) || is_title_case(trimmed) {
            let lowered = trimmed.to_lowercase();
            const KEYWORDS: [&str; 8] = [
                "statement",
                "report",
                "financial",
                "consolidated",
                "note",
                "summary",
                "analysis",
                "position",
            ];
            return KEYWORDS.iter().any(|k| lowered.contains(k));
        }

        false
    }
}

fn is_all_upper(text: &str) -> bool {
    let mut has_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            has_alpha = true;
            if c.is_lowercase() {
                return false;
            }
        }
    }
    has_alpha
}

fn is_title_case(text: &str) -> bool {
    let mut has_word = false;
    for word in text.split_whitespace() {
        if let Some(first) = word.chars().find(|c| c.is_alphabetic()) {
            has_word = true;
            if first.is_lowercase() {
                return false;
            }
        }
    }
    has_word
}

/// Optional rescorer for detected sections (e.g. an embedding model).
///
/// Returns a similarity in `[0, 1]` for the section name against the type's
/// reference phrasing, or `None` when the scorer has no opinion.
pub trait SectionScorer: Send + Sync {
    fn score(&self, section_name: &str, section_type: SectionType) -> Option<f64>;
}

/// Locates financial-statement sections in the text-block stream.
pub struct SectionLocator {
    patterns: SectionPatterns,
    detection: SectionDetectionConfig,
    scorer: Option<Box<dyn SectionScorer>>,
}

struct HeaderCandidate {
    section_type: SectionType,
    section_name: String,
    start_page: u32,
    confidence: f64,
}

impl SectionLocator {
    pub fn new(detection: SectionDetectionConfig) -> Self {
        Self {
            patterns: SectionPatterns::new(),
            detection,
            scorer: None,
        }
    }

    /// Install an embedding rescorer; hybrid confidence applies from then on.
    pub fn with_scorer(mut self, scorer: Box<dyn SectionScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn locate_sections(&self, text_blocks: &[TextBlock]) -> Vec<Section> {
        let mut candidates = Vec::new();

        for block in text_blocks {
            if !self.patterns.is_section_header(&block.text) {
                continue;
            }
            let matched = self.patterns.match_section_types(&block.text);
            let Some(section_type) = matched.first() else {
                continue;
            };
            candidates.push(HeaderCandidate {
                section_type: *section_type,
                section_name: block.text.trim().to_string(),
                start_page: block.page_number,
                confidence: 0.9,
            });
        }

        debug!("{} header candidates found", candidates.len());

        let last_page = text_blocks.iter().map(|b| b.page_number).max().unwrap_or(1);
        let sections = self.assign_boundaries(candidates, last_page);
        let sections = merge_sections(sections);
        let sections = self.rescore(sections);

        info!("{} sections located", sections.len());
        sections
    }

    fn assign_boundaries(
        &self,
        mut candidates: Vec<HeaderCandidate>,
        last_page: u32,
    ) -> Vec<Section> {
        candidates.sort_by_key(|c| c.start_page);

        let mut sections = Vec::with_capacity(candidates.len());
        for i in 0..candidates.len() {
            let end_page = if i + 1 < candidates.len() {
                candidates[i + 1]
                    .start_page
                    .saturating_sub(1)
                    .max(candidates[i].start_page)
            } else {
                last_page.max(candidates[i].start_page)
            };

            let candidate = &candidates[i];
            sections.push(Section {
                section_id: format!("section_{}_{}", candidate.section_type, candidate.start_page),
                section_type: candidate.section_type,
                section_name: candidate.section_name.clone(),
                start_page: candidate.start_page,
                end_page,
                confidence: candidate.confidence,
                detection_method: DetectionMethod::Regex,
            });
        }

        sections
    }

    fn rescore(&self, mut sections: Vec<Section>) -> Vec<Section> {
        let Some(scorer) = &self.scorer else {
            return sections;
        };

        for section in &mut sections {
            let Some(similarity) = scorer.score(&section.section_name, section.section_type) else {
                continue;
            };
            if similarity >= self.detection.similarity_threshold {
                section.confidence = self.detection.regex_weight * section.confidence
                    + self.detection.embedding_weight * similarity;
                section.detection_method = DetectionMethod::Hybrid;
            }
        }

        sections
    }

    /// Concatenated text of every block within the section's page range.
    pub fn get_section_text(&self, section: &Section, text_blocks: &[TextBlock]) -> String {
        text_blocks
            .iter()
            .filter(|block| section.contains_page(block.page_number))
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Merge same-type sections whose page ranges touch or overlap, keeping the
/// max end page and confidence.
fn merge_sections(sections: Vec<Section>) -> Vec<Section> {
    let mut merged: Vec<Section> = Vec::with_capacity(sections.len());

    for section in sections {
        let mergeable = merged
            .iter_mut()
            .rev()
            .find(|existing| existing.section_type == section.section_type);

        match mergeable {
            Some(existing) if section.start_page <= existing.end_page + 1 => {
                debug!(
                    "merging {} sections at pages {}-{}",
                    section.section_type, existing.start_page, section.end_page
                );
                existing.end_page = existing.end_page.max(section.end_page);
                existing.confidence = existing.confidence.max(section.confidence);
            }
            _ => merged.push(section),
        }
    }

    merged
}

pub fn find_section_by_type(sections: &[Section], section_type: SectionType) -> Option<&Section> {
    sections.iter().find(|s| s.section_type == section_type)
}

/// Check the critical section set; returns `(ok, missing)`.
pub fn validate_sections(sections: &[Section]) -> (bool, Vec<SectionType>) {
    let missing: Vec<SectionType> = SectionType::critical()
        .into_iter()
        .filter(|critical| !sections.iter().any(|s| s.section_type == *critical))
        .collect();

    if !missing.is_empty() {
        warn!("missing critical sections: {missing:?}");
    }

    (missing.is_empty(), missing)
}
