use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use log::info;
use rust_decimal::Decimal;
use serde_json::json;

use crate::config::PipelineConfig;
use crate::schema::{
    CandidateSource, CandidateValue, Evidence, ValidationResult, ValidationSeverity,
    ValidationStatus,
};

const VALID_CURRENCIES: [&str; 3] = ["GBP", "USD", "EUR"];

/// How an arithmetic identity combines its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    /// target = a + b
    Sum,
    /// target = a - b
    Difference,
}

struct ArithmeticRule {
    target: &'static str,
    components: [&'static str; 2],
    combine: Combine,
}

/// Rule-based validation over candidate values.
///
/// Rules are data: per-label bound tables and arithmetic identities. Adding a
/// rule means adding an entry.
pub struct DeterministicValidator {
    /// Bounds on value / revenue for the same period.
    metric_bounds: HashMap<&'static str, (Decimal, Decimal)>,
    /// Bounds on year-over-year relative change.
    yoy_bounds: HashMap<&'static str, (Decimal, Decimal)>,
    arithmetic_rules: Vec<ArithmeticRule>,
    tolerance: Decimal,
}

impl Default for DeterministicValidator {
    fn default() -> Self {
        Self::new(Decimal::new(5, 2))
    }
}

impl DeterministicValidator {
    pub fn new(tolerance: Decimal) -> Self {
        let bound = |min: &str, max: &str| -> (Decimal, Decimal) {
            (
                min.parse().expect("static bound must parse"),
                max.parse().expect("static bound must parse"),
            )
        };

        let metric_bounds = HashMap::from([
            ("gross_profit", bound("0.0", "1.0")),
            ("operating_profit", bound("-0.5", "1.0")),
            ("net_income", bound("-1.0", "1.0")),
            ("ebitda", bound("-0.5", "1.5")),
            ("current_assets", bound("0.0", "10.0")),
            ("total_assets", bound("0.0", "50.0")),
            ("current_liabilities", bound("0.0", "10.0")),
            ("total_liabilities", bound("0.0", "50.0")),
            ("total_equity", bound("-5.0", "50.0")),
        ]);

        let yoy_bounds = HashMap::from([
            ("revenue", bound("-0.5", "2.0")),
            ("gross_profit", bound("-0.7", "3.0")),
            ("operating_profit", bound("-2.0", "5.0")),
            ("net_income", bound("-3.0", "10.0")),
            ("total_assets", bound("-0.3", "1.0")),
            ("total_equity", bound("-0.5", "1.5")),
        ]);

        let arithmetic_rules = vec![
            ArithmeticRule {
                target: "total_assets",
                components: ["current_assets", "non_current_assets"],
                combine: Combine::Sum,
            },
            ArithmeticRule {
                target: "total_liabilities",
                components: ["current_liabilities", "non_current_liabilities"],
                combine: Combine::Sum,
            },
            ArithmeticRule {
                target: "gross_profit",
                components: ["revenue", "cost_of_sales"],
                combine: Combine::Difference,
            },
            ArithmeticRule {
                target: "operating_profit",
                components: ["gross_profit", "operating_expenses"],
                combine: Combine::Difference,
            },
        ];

        Self {
            metric_bounds,
            yoy_bounds,
            arithmetic_rules,
            tolerance,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let tolerance = Decimal::try_from(config.validation.arithmetic_tolerance)
            .unwrap_or_else(|_| Decimal::new(5, 2));
        Self::new(tolerance)
    }

    /// Apply every rule to every candidate, in rule order.
    pub fn validate_candidates(&self, candidates: &[CandidateValue]) -> Vec<ValidationResult> {
        let mut results = Vec::new();

        for candidate in candidates {
            results.push(self.check_unit_consistency(candidate));
            results.push(self.check_range_bounds(candidate, candidates));
            results.push(self.check_yoy_delta(candidate, candidates));
            results.push(self.check_arithmetic(candidate, candidates));
        }

        let issues = results.iter().filter(|r| r.is_issue()).count();
        info!(
            "validated {} candidates: {} rule results, {} issues",
            candidates.len(),
            results.len(),
            issues
        );

        results
    }

    /// Re-run the candidate rules over already-adjudicated metrics.
    pub fn validate_metrics(
        &self,
        metrics: &[crate::schema::FinancialMetric],
    ) -> Vec<ValidationResult> {
        let candidates: Vec<CandidateValue> = metrics
            .iter()
            .map(|metric| CandidateValue {
                candidate_id: metric.metric_id.clone(),
                metric_name: metric.metric_name.clone(),
                value: metric.value,
                currency: metric.currency.clone(),
                scale: metric.scale,
                period_end_date: metric.period_end_date,
                section_type: crate::schema::SectionType::Notes,
                source: CandidateSource::TableCell,
                confidence_score: 1.0,
                evidence: Evidence::default(),
                extraction_timestamp: chrono::Utc::now(),
            })
            .collect();

        self.validate_candidates(&candidates)
    }

    fn check_unit_consistency(&self, candidate: &CandidateValue) -> ValidationResult {
        // Scale is a closed enum, so only the currency can be off.
        if !VALID_CURRENCIES.contains(&candidate.currency.as_str()) {
            return issue(
                candidate,
                "unit_consistency",
                ValidationSeverity::Critical,
                format!("invalid currency: {}", candidate.currency),
                None,
            );
        }

        pass(candidate, "unit_consistency", "units are consistent")
    }

    fn check_range_bounds(
        &self,
        candidate: &CandidateValue,
        all: &[CandidateValue],
    ) -> ValidationResult {
        let Some((min, max)) = self.metric_bounds.get(candidate.metric_name.as_str()) else {
            return pass(candidate, "range_check", "no bounds configured for label");
        };

        let Some(revenue) = best_candidate(all, "revenue", candidate.period_end_date) else {
            return pass(candidate, "range_check", "no revenue reference for period");
        };

        if revenue.value.is_zero() {
            return pass(candidate, "range_check", "revenue is zero, ratio undefined");
        }

        let ratio = candidate.value / revenue.value;
        if ratio < *min || ratio > *max {
            return issue(
                candidate,
                "range_check",
                ValidationSeverity::Major,
                format!("ratio {ratio} to revenue outside bounds [{min}, {max}]"),
                Some(json!({"ratio": ratio.to_string(), "revenue": revenue.value.to_string()})),
            );
        }

        pass(candidate, "range_check", "ratio to revenue within bounds")
    }

    fn check_yoy_delta(
        &self,
        candidate: &CandidateValue,
        all: &[CandidateValue],
    ) -> ValidationResult {
        let Some(period_end) = candidate.period_end_date else {
            return pass(candidate, "yoy_delta", "no period for comparison");
        };

        let Some(prior) = find_prior_year(all, &candidate.metric_name, period_end) else {
            return pass(candidate, "yoy_delta", "no prior-year data for comparison");
        };

        if prior.value.is_zero() {
            return pass(candidate, "yoy_delta", "prior-year value is zero");
        }

        let change = (candidate.value - prior.value) / prior.value.abs();

        if let Some((min, max)) = self.yoy_bounds.get(candidate.metric_name.as_str()) {
            if change < *min || change > *max {
                return issue(
                    candidate,
                    "yoy_delta",
                    ValidationSeverity::Minor,
                    format!("YoY change {change} outside bounds [{min}, {max}]"),
                    Some(json!({"yoy_change": change.to_string()})),
                );
            }
        }

        pass(candidate, "yoy_delta", "YoY change is reasonable")
    }

    fn check_arithmetic(
        &self,
        candidate: &CandidateValue,
        all: &[CandidateValue],
    ) -> ValidationResult {
        let Some(rule) = self
            .arithmetic_rules
            .iter()
            .find(|rule| rule.target == candidate.metric_name)
        else {
            return pass(candidate, "arithmetic", "no arithmetic identity for label");
        };

        let mut values = Vec::with_capacity(rule.components.len());
        for component in rule.components {
            match best_candidate(all, component, candidate.period_end_date) {
                Some(found) => values.push(found.value),
                None => {
                    return pass(
                        candidate,
                        "arithmetic",
                        &format!("missing component: {component}"),
                    );
                }
            }
        }

        let expected = match rule.combine {
            Combine::Sum => values[0] + values[1],
            Combine::Difference => values[0] - values[1],
        };

        if expected.is_zero() {
            return pass(candidate, "arithmetic", "expected value is zero");
        }

        let difference = (candidate.value - expected).abs();
        if difference > (expected * self.tolerance).abs() {
            return issue(
                candidate,
                "arithmetic",
                ValidationSeverity::Major,
                format!(
                    "arithmetic mismatch: {} vs expected {expected} (diff {difference})",
                    candidate.value
                ),
                Some(json!({
                    "expected": expected.to_string(),
                    "observed": candidate.value.to_string(),
                })),
            );
        }

        pass(candidate, "arithmetic", "identity holds within tolerance")
    }
}

fn pass(candidate: &CandidateValue, rule_name: &str, message: &str) -> ValidationResult {
    ValidationResult {
        candidate_id: candidate.candidate_id.clone(),
        rule_name: rule_name.to_string(),
        status: ValidationStatus::Valid,
        severity: ValidationSeverity::Minor,
        message: message.to_string(),
        details: None,
    }
}

fn issue(
    candidate: &CandidateValue,
    rule_name: &str,
    severity: ValidationSeverity,
    message: String,
    details: Option<serde_json::Value>,
) -> ValidationResult {
    ValidationResult {
        candidate_id: candidate.candidate_id.clone(),
        rule_name: rule_name.to_string(),
        status: ValidationStatus::Invalid,
        severity,
        message,
        details,
    }
}

/// Pick the reference candidate for a label and period: table-sourced first,
/// then highest confidence, then id for determinism.
fn best_candidate<'a>(
    candidates: &'a [CandidateValue],
    metric_name: &str,
    period_end_date: Option<NaiveDate>,
) -> Option<&'a CandidateValue> {
    candidates
        .iter()
        .filter(|c| c.metric_name == metric_name)
        .filter(|c| period_end_date.is_none() || c.period_end_date == period_end_date)
        .max_by(|a, b| {
            let key = |c: &CandidateValue| (c.source == CandidateSource::TableCell, c.confidence_score);
            let (a_table, a_conf) = key(a);
            let (b_table, b_conf) = key(b);
            a_table
                .cmp(&b_table)
                .then(a_conf.total_cmp(&b_conf))
                .then(b.candidate_id.cmp(&a.candidate_id))
        })
}

fn is_february_month_end(date: NaiveDate) -> bool {
    date.month() == 2 && (date.day() == 28 || date.day() == 29)
}

/// Find the same metric one year earlier. The match requires an identical
/// (month, day), except that February month-ends pair across leap years.
fn find_prior_year<'a>(
    candidates: &'a [CandidateValue],
    metric_name: &str,
    period_end: NaiveDate,
) -> Option<&'a CandidateValue> {
    let prior_year = period_end.year() - 1;

    candidates
        .iter()
        .filter(|c| c.metric_name == metric_name)
        .find(|c| {
            let Some(prior_end) = c.period_end_date else {
                return false;
            };
            if prior_end.year() != prior_year || prior_end.month() != period_end.month() {
                return false;
            }
            prior_end.day() == period_end.day()
                || (is_february_month_end(period_end) && is_february_month_end(prior_end))
        })
}

/// Per-candidate summary of validation results.
#[derive(Debug, Clone)]
pub struct ValidationSummary {
    pub total_candidates: usize,
    pub valid: usize,
    pub needs_review: usize,
    pub invalid: usize,
    pub pass_rate: f64,
    /// Candidate ids routed to adjudication, in id order.
    pub needs_adjudication: Vec<String>,
}

/// Aggregates rule results into per-candidate statuses and summary stats.
pub struct ValidationAggregator;

impl ValidationAggregator {
    /// Status per candidate: zero issues is valid, one needs review, two or
    /// more is invalid.
    pub fn candidate_statuses(
        results: &[ValidationResult],
    ) -> BTreeMap<String, ValidationStatus> {
        let mut issue_counts: BTreeMap<String, usize> = BTreeMap::new();
        for result in results {
            let entry = issue_counts.entry(result.candidate_id.clone()).or_insert(0);
            if result.is_issue() {
                *entry += 1;
            }
        }

        issue_counts
            .into_iter()
            .map(|(candidate_id, issues)| {
                let status = match issues {
                    0 => ValidationStatus::Valid,
                    1 => ValidationStatus::NeedsReview,
                    _ => ValidationStatus::Invalid,
                };
                (candidate_id, status)
            })
            .collect()
    }

    pub fn aggregate(results: &[ValidationResult]) -> ValidationSummary {
        let statuses = Self::candidate_statuses(results);

        let total_candidates = statuses.len();
        let valid = statuses
            .values()
            .filter(|s| **s == ValidationStatus::Valid)
            .count();
        let needs_review = statuses
            .values()
            .filter(|s| **s == ValidationStatus::NeedsReview)
            .count();
        let invalid = statuses
            .values()
            .filter(|s| **s == ValidationStatus::Invalid)
            .count();

        let needs_adjudication: Vec<String> = statuses
            .iter()
            .filter(|(_, status)| **status != ValidationStatus::Valid)
            .map(|(id, _)| id.clone())
            .collect();

        ValidationSummary {
            total_candidates,
            valid,
            needs_review,
            invalid,
            pass_rate: if total_candidates == 0 {
                0.0
            } else {
                valid as f64 / total_candidates as f64
            },
            needs_adjudication,
        }
    }
}
