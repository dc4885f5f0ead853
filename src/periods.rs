use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    FiscalYear,
    HalfYear,
    Quarter,
}

/// A period label resolved to a concrete date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPeriod {
    pub period_type: PeriodType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub fiscal_year: i32,
    pub quarter: Option<u8>,
    pub half: Option<u8>,
    pub original_label: String,
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    match prefix.as_str() {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(28, |d| d.day())
}

/// Build a date, clamping the day to the end of the month when it overflows.
fn date_clamped(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month, last_day_of_month(year, month)))
}

/// Parses financial reporting period labels into structured date ranges.
pub struct PeriodParser {
    fy_patterns: Vec<Regex>,
    quarter_patterns: Vec<Regex>,
    half_patterns: Vec<Regex>,
}

impl Default for PeriodParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodParser {
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("period pattern must compile"))
                .collect()
        };

        Self {
            fy_patterns: compile(&[
                r"(?i)(?:FY|Fiscal\s+Year)\s*[:\-]?\s*(\d{4})",
                r"(?i)(?:For\s+the\s+)?[Yy]ear\s+ended?\s+(\d{1,2})\s+([A-Za-z]+)\s+(\d{4})",
                r"(?i)(\d{1,2})\s+([A-Za-z]+)\s+(\d{4})",
                r"(\d{4})\s*[-/]\s*(\d{2,4})",
                // A bare year on its own, as table column headers print it.
                r"^\s*(\d{4})\s*$",
            ]),
            quarter_patterns: compile(&[
                r"(?i)(?:Q|Quarter)\s*(\d)\s*-?\s*(?:FY)?\s*(\d{4})",
                r"(?i)(\d)(?:st|nd|rd|th)\s+Quarter\s+(\d{4})",
                r"(?i)Three\s+months\s+ended?\s+(\d{1,2})\s+([A-Za-z]+)\s+(\d{4})",
            ]),
            half_patterns: compile(&[
                r"(?i)(?:H|Half)\s*(\d)\s*-?\s*(?:FY)?\s*(\d{4})",
                r"(?i)Six\s+months\s+ended?\s+(\d{1,2})\s+([A-Za-z]+)\s+(\d{4})",
            ]),
        }
    }

    /// Parse a period label, or `None` when no pattern matches.
    ///
    /// Quarter and half-year shapes are tried before fiscal-year shapes so that
    /// "Six months ended 30 June 2023" is not swallowed by the bare-date rule.
    pub fn parse_period_label(&self, label: &str) -> Option<ParsedPeriod> {
        let label_clean = label.trim();
        if label_clean.is_empty() {
            return None;
        }

        let parsed = self
            .parse_quarter(label_clean)
            .or_else(|| self.parse_half_year(label_clean))
            .or_else(|| self.parse_fiscal_year(label_clean));

        if parsed.is_none() {
            debug!("period label did not match any pattern: {label_clean:?}");
        }
        parsed
    }

    fn parse_fiscal_year(&self, label: &str) -> Option<ParsedPeriod> {
        for pattern in &self.fy_patterns {
            let Some(caps) = pattern.captures(label) else {
                continue;
            };

            let period = match caps.len() - 1 {
                // FY2023
                1 => {
                    let fiscal_year: i32 = caps[1].parse().ok()?;
                    ParsedPeriod {
                        period_type: PeriodType::FiscalYear,
                        start_date: NaiveDate::from_ymd_opt(fiscal_year - 1, 1, 1)?,
                        end_date: NaiveDate::from_ymd_opt(fiscal_year, 12, 31)?,
                        fiscal_year,
                        quarter: None,
                        half: None,
                        original_label: label.to_string(),
                    }
                }
                // 2023-24 or 2023/2024
                2 => {
                    let year1: i32 = caps[1].parse().ok()?;
                    let year2_str = &caps[2];
                    let year2: i32 = if year2_str.len() == 2 {
                        // Expand the short year against the long year's century.
                        format!("{}{}", &caps[1][..2], year2_str).parse().ok()?
                    } else {
                        year2_str.parse().ok()?
                    };
                    ParsedPeriod {
                        period_type: PeriodType::FiscalYear,
                        start_date: NaiveDate::from_ymd_opt(year1, 1, 1)?,
                        end_date: NaiveDate::from_ymd_opt(year2, 12, 31)?,
                        fiscal_year: year2,
                        quarter: None,
                        half: None,
                        original_label: label.to_string(),
                    }
                }
                // Year ended 31 December 2023, or a bare 31 December 2023
                3 => {
                    let day: u32 = caps[1].parse().ok()?;
                    let month = match month_from_name(&caps[2]) {
                        Some(month) => month,
                        None => continue,
                    };
                    let year: i32 = caps[3].parse().ok()?;
                    let end_date = NaiveDate::from_ymd_opt(year, month, day)?;
                    let start_day = if day < 28 { day + 1 } else { 1 };
                    ParsedPeriod {
                        period_type: PeriodType::FiscalYear,
                        start_date: date_clamped(year - 1, month, start_day)?,
                        end_date,
                        fiscal_year: year,
                        quarter: None,
                        half: None,
                        original_label: label.to_string(),
                    }
                }
                _ => continue,
            };

            return Some(period);
        }

        None
    }

    fn parse_quarter(&self, label: &str) -> Option<ParsedPeriod> {
        for pattern in &self.quarter_patterns {
            let Some(caps) = pattern.captures(label) else {
                continue;
            };

            let period = match caps.len() - 1 {
                // Q1 2024 / 1st Quarter 2024
                2 => {
                    let quarter: u8 = caps[1].parse().ok()?;
                    if !(1..=4).contains(&quarter) {
                        continue;
                    }
                    let fiscal_year: i32 = caps[2].parse().ok()?;
                    let (start_month, end_month, end_day) = match quarter {
                        1 => (1, 3, 31),
                        2 => (4, 6, 30),
                        3 => (7, 9, 30),
                        _ => (10, 12, 31),
                    };
                    ParsedPeriod {
                        period_type: PeriodType::Quarter,
                        start_date: NaiveDate::from_ymd_opt(fiscal_year, start_month, 1)?,
                        end_date: NaiveDate::from_ymd_opt(fiscal_year, end_month, end_day)?,
                        fiscal_year,
                        quarter: Some(quarter),
                        half: None,
                        original_label: label.to_string(),
                    }
                }
                // Three months ended 31 March 2024
                3 => {
                    let day: u32 = caps[1].parse().ok()?;
                    let month = match month_from_name(&caps[2]) {
                        Some(month) => month,
                        None => continue,
                    };
                    let year: i32 = caps[3].parse().ok()?;
                    let end_date = NaiveDate::from_ymd_opt(year, month, day)?;
                    let (start_year, start_month) = if month > 3 {
                        (year, month - 3)
                    } else {
                        (year - 1, month + 9)
                    };
                    ParsedPeriod {
                        period_type: PeriodType::Quarter,
                        start_date: date_clamped(start_year, start_month, day)?,
                        end_date,
                        fiscal_year: year,
                        quarter: Some(((month - 1) / 3 + 1) as u8),
                        half: None,
                        original_label: label.to_string(),
                    }
                }
                _ => continue,
            };

            return Some(period);
        }

        None
    }

    fn parse_half_year(&self, label: &str) -> Option<ParsedPeriod> {
        for pattern in &self.half_patterns {
            let Some(caps) = pattern.captures(label) else {
                continue;
            };

            let period = match caps.len() - 1 {
                // H1 2023
                2 => {
                    let half: u8 = caps[1].parse().ok()?;
                    if !(1..=2).contains(&half) {
                        continue;
                    }
                    let fiscal_year: i32 = caps[2].parse().ok()?;
                    let (start, end) = if half == 1 {
                        (
                            NaiveDate::from_ymd_opt(fiscal_year, 1, 1)?,
                            NaiveDate::from_ymd_opt(fiscal_year, 6, 30)?,
                        )
                    } else {
                        (
                            NaiveDate::from_ymd_opt(fiscal_year, 7, 1)?,
                            NaiveDate::from_ymd_opt(fiscal_year, 12, 31)?,
                        )
                    };
                    ParsedPeriod {
                        period_type: PeriodType::HalfYear,
                        start_date: start,
                        end_date: end,
                        fiscal_year,
                        quarter: None,
                        half: Some(half),
                        original_label: label.to_string(),
                    }
                }
                // Six months ended 30 June 2023
                3 => {
                    let day: u32 = caps[1].parse().ok()?;
                    let month = match month_from_name(&caps[2]) {
                        Some(month) => month,
                        None => continue,
                    };
                    let year: i32 = caps[3].parse().ok()?;
                    let end_date = NaiveDate::from_ymd_opt(year, month, day)?;
                    let (start_year, start_month) = if month > 6 {
                        (year, month - 6)
                    } else {
                        (year - 1, month + 6)
                    };
                    ParsedPeriod {
                        period_type: PeriodType::HalfYear,
                        start_date: date_clamped(start_year, start_month, day)?,
                        end_date,
                        fiscal_year: year,
                        quarter: None,
                        half: Some(if month <= 6 { 1 } else { 2 }),
                        original_label: label.to_string(),
                    }
                }
                _ => continue,
            };

            return Some(period);
        }

        None
    }

    /// Normalize a label to `FY{YYYY}`, `Q{n}-{YYYY}` or `H{n}-{YYYY}`.
    ///
    /// Unparseable labels come back unchanged.
    pub fn normalize_period_label(&self, label: &str) -> String {
        match self.parse_period_label(label) {
            Some(parsed) => match parsed.period_type {
                PeriodType::FiscalYear => format!("FY{}", parsed.fiscal_year),
                PeriodType::Quarter => {
                    format!("Q{}-{}", parsed.quarter.unwrap_or(1), parsed.fiscal_year)
                }
                PeriodType::HalfYear => {
                    format!("H{}-{}", parsed.half.unwrap_or(1), parsed.fiscal_year)
                }
            },
            None => label.to_string(),
        }
    }

    /// The most frequent (month, day) among fiscal-year end dates parsed from
    /// `labels`, or `None` when nothing parses as a fiscal year.
    pub fn detect_fiscal_year_end(&self, labels: &[String]) -> Option<(u32, u32)> {
        let mut counts: HashMap<(u32, u32), usize> = HashMap::new();

        for label in labels {
            if let Some(parsed) = self.parse_period_label(label) {
                if parsed.period_type == PeriodType::FiscalYear {
                    let key = (parsed.end_date.month(), parsed.end_date.day());
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
        }

        counts
            .into_iter()
            .max_by_key(|((month, day), count)| (*count, std::cmp::Reverse((*month, *day))))
            .map(|(key, _)| key)
    }
}

/// Maps surface metric labels to canonical labels.
pub struct LabelStandardizer {
    // Ordered so substring matching is deterministic.
    mappings: Vec<(String, Vec<String>)>,
    reverse_index: HashMap<String, String>,
    parenthetical: Regex,
    whitespace: Regex,
}

impl Default for LabelStandardizer {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelStandardizer {
    pub fn new() -> Self {
        let table: &[(&str, &[&str])] = &[
            // Income statement
            (
                "revenue",
                &[
                    "revenue",
                    "total revenue",
                    "net revenue",
                    "sales",
                    "turnover",
                    "net sales",
                ],
            ),
            ("cost_of_sales", &["cost of sales", "cost of goods sold", "cogs"]),
            ("gross_profit", &["gross profit", "gross margin"]),
            (
                "operating_expenses",
                &["operating expenses", "administrative expenses", "operating costs"],
            ),
            (
                "operating_profit",
                &["operating profit", "operating income", "ebit", "operating earnings"],
            ),
            (
                "net_income",
                &[
                    "net income",
                    "net profit",
                    "profit for the year",
                    "profit for the period",
                    "net earnings",
                ],
            ),
            ("ebitda", &["ebitda", "adjusted ebitda"]),
            // Balance sheet
            ("total_assets", &["total assets", "assets"]),
            ("current_assets", &["current assets"]),
            (
                "non_current_assets",
                &["non-current assets", "non current assets", "fixed assets"],
            ),
            ("total_liabilities", &["total liabilities", "liabilities"]),
            ("current_liabilities", &["current liabilities"]),
            (
                "non_current_liabilities",
                &[
                    "non-current liabilities",
                    "non current liabilities",
                    "long-term liabilities",
                ],
            ),
            (
                "total_equity",
                &[
                    "total equity",
                    "shareholders' equity",
                    "stockholders' equity",
                    "equity",
                ],
            ),
            ("retained_earnings", &["retained earnings", "accumulated profits"]),
            ("total_debt", &["total debt", "total borrowings", "borrowings"]),
            ("net_debt", &["net debt"]),
            (
                "cash_and_cash_equivalents",
                &["cash and cash equivalents", "cash and equivalents"],
            ),
            ("cash", &["cash", "cash at bank"]),
            // Cash flow
            (
                "operating_cash_flow",
                &[
                    "cash from operating activities",
                    "operating cash flow",
                    "net cash from operations",
                ],
            ),
            (
                "investing_cash_flow",
                &[
                    "cash from investing activities",
                    "investing cash flow",
                    "net cash used in investing",
                ],
            ),
            (
                "financing_cash_flow",
                &[
                    "cash from financing activities",
                    "financing cash flow",
                    "net cash from financing",
                ],
            ),
            ("free_cash_flow", &["free cash flow", "fcf"]),
        ];

        let mappings: Vec<(String, Vec<String>)> = table
            .iter()
            .map(|(canonical, variants)| {
                (
                    canonical.to_string(),
                    variants.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect();

        let mut standardizer = Self {
            mappings,
            reverse_index: HashMap::new(),
            parenthetical: Regex::new(r"\s*\([^)]*\)\s*").expect("pattern must compile"),
            whitespace: Regex::new(r"\s+").expect("pattern must compile"),
        };
        standardizer.rebuild_reverse_index();
        standardizer
    }

    fn rebuild_reverse_index(&mut self) {
        self.reverse_index.clear();
        for (canonical, variants) in &self.mappings {
            // Canonical labels map to themselves so standardization is a
            // fixed point.
            self.reverse_index
                .insert(canonical.to_lowercase(), canonical.clone());
            for variant in variants {
                self.reverse_index
                    .insert(variant.to_lowercase(), canonical.clone());
            }
        }
    }

    fn clean(&self, label: &str) -> String {
        let lowered = label.to_lowercase();
        let stripped = self.parenthetical.replace_all(&lowered, " ");
        self.whitespace.replace_all(&stripped, " ").trim().to_string()
    }

    /// Map a raw label to its canonical form, or return the cleaned input when
    /// no mapping applies.
    pub fn standardize(&self, label: &str) -> String {
        let cleaned = self.clean(label);

        if let Some(canonical) = self.reverse_index.get(&cleaned) {
            return canonical.clone();
        }

        if let Some(canonical) = self.fuzzy_match(&cleaned) {
            debug!("label {label:?} fuzzy-matched to {canonical:?}");
            return canonical;
        }

        cleaned
    }

    fn fuzzy_match(&self, cleaned: &str) -> Option<String> {
        if cleaned.is_empty() {
            return None;
        }
        for (canonical, variants) in &self.mappings {
            for variant in variants {
                if variant.contains(cleaned) || cleaned.contains(variant.as_str()) {
                    return Some(canonical.clone());
                }
            }
        }
        None
    }

    /// Whether the label resolves to a known canonical label.
    pub fn is_known(&self, label: &str) -> bool {
        let standardized = self.standardize(label);
        self.mappings
            .iter()
            .any(|(canonical, _)| canonical == &standardized)
    }

    pub fn standard_labels(&self) -> Vec<String> {
        self.mappings
            .iter()
            .map(|(canonical, _)| canonical.clone())
            .collect()
    }

    /// Register extra variants for a canonical label. Existing variants are
    /// never removed.
    pub fn add_custom_mapping(&mut self, canonical: &str, variants: &[&str]) {
        let entry = self
            .mappings
            .iter_mut()
            .find(|(existing, _)| existing == canonical);

        match entry {
            Some((_, existing_variants)) => {
                existing_variants.extend(variants.iter().map(|v| v.to_string()));
            }
            None => {
                warn!("registering new canonical label at runtime: {canonical}");
                self.mappings.push((
                    canonical.to_string(),
                    variants.iter().map(|v| v.to_string()).collect(),
                ));
            }
        }

        self.reverse_index
            .insert(canonical.to_lowercase(), canonical.to_string());
        for variant in variants {
            self.reverse_index
                .insert(variant.to_lowercase(), canonical.to_string());
        }
    }
}
