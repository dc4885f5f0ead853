use std::collections::{BTreeMap, BTreeSet};

use chrono::Datelike;
use log::{debug, info, warn};
use rust_decimal::Decimal;

use crate::config::ValidationConfig;
use crate::schema::{EntityType, ExtractionMethod, FinancialMetric, Scale};

type MetricsByPeriod<'a> = BTreeMap<String, BTreeMap<String, &'a FinancialMetric>>;

/// Computes ratios and growth rates over the adjudicated metric set.
pub struct DerivedMetricsComputer {
    yoy_growth_min: Decimal,
    yoy_growth_max: Decimal,
    margin_min: Decimal,
    margin_max: Decimal,
}

impl Default for DerivedMetricsComputer {
    fn default() -> Self {
        Self::new(&ValidationConfig::default())
    }
}

impl DerivedMetricsComputer {
    pub fn new(validation: &ValidationConfig) -> Self {
        let decimal = |value: f64, fallback: Decimal| -> Decimal {
            Decimal::try_from(value).unwrap_or(fallback)
        };

        Self {
            yoy_growth_min: decimal(validation.yoy_growth_min, Decimal::NEGATIVE_ONE),
            yoy_growth_max: decimal(validation.yoy_growth_max, Decimal::from(5)),
            margin_min: decimal(validation.margin_min, Decimal::NEGATIVE_ONE),
            margin_max: decimal(validation.margin_max, Decimal::ONE),
        }
    }

    /// Compute every derivable metric. Output order is deterministic:
    /// growth, profitability, leverage, liquidity; ascending period within
    /// each label.
    pub fn compute_all(&self, metrics: &[FinancialMetric]) -> Vec<FinancialMetric> {
        let by_period = index_metrics(metrics);

        let mut derived = Vec::new();
        derived.extend(self.growth_rates(&by_period));
        derived.extend(self.profitability_ratios(&by_period));
        derived.extend(self.leverage_ratios(&by_period));
        derived.extend(self.liquidity_ratios(&by_period));

        info!(
            "computed {} derived metrics from {} base metrics",
            derived.len(),
            metrics.len()
        );
        derived
    }

    fn growth_rates(&self, by_period: &MetricsByPeriod<'_>) -> Vec<FinancialMetric> {
        const TARGETS: [(&str, &str); 4] = [
            ("revenue", "Revenue Growth"),
            ("ebitda", "EBITDA Growth"),
            ("net_income", "Net Income Growth"),
            ("operating_profit", "Operating Profit Growth"),
        ];

        let mut growth_metrics = Vec::new();

        for (key, display_name) in TARGETS {
            let Some(periods) = by_period.get(key) else {
                continue;
            };

            let ordered: Vec<(&String, &&FinancialMetric)> = periods.iter().collect();
            for window in ordered.windows(2) {
                let (prior_period, prior) = window[0];
                let (current_period, current) = window[1];

                if prior.value.is_zero() {
                    debug!("zero prior value for {key}, skipping growth at {current_period}");
                    continue;
                }

                let growth = (current.value - prior.value) / prior.value.abs();

                if growth > self.yoy_growth_max || growth < self.yoy_growth_min {
                    warn!(
                        "{display_name} of {growth} at {current_period} is outside \
                         [{}, {}], emitting anyway",
                        self.yoy_growth_min, self.yoy_growth_max
                    );
                }

                growth_metrics.push(FinancialMetric {
                    metric_id: format!("{key}_growth_{current_period}"),
                    metric_name: format!("{display_name} YoY"),
                    value: growth,
                    currency: String::new(),
                    scale: Scale::Actual,
                    period_end_date: current.period_end_date,
                    entity_type: current.entity_type,
                    extraction_method: ExtractionMethod::Calculated,
                    confidence_score: None,
                    llm_reasoning: None,
                    llm_confidence: None,
                    notes: Some(format!("Calculated from {prior_period} to {current_period}")),
                });
            }
        }

        growth_metrics
    }

    fn profitability_ratios(&self, by_period: &MetricsByPeriod<'_>) -> Vec<FinancialMetric> {
        const MARGINS: [(&str, &str, &str); 3] = [
            ("ebitda", "EBITDA Margin", "ebitda_margin"),
            ("net_income", "Net Margin", "net_margin"),
            ("operating_profit", "Operating Margin", "operating_margin"),
        ];

        let mut ratio_metrics = Vec::new();

        for period in all_periods(by_period) {
            for (numerator_key, display_name, id_prefix) in MARGINS {
                let Some(numerator) = lookup(by_period, numerator_key, &period) else {
                    continue;
                };
                let Some(revenue) = lookup(by_period, "revenue", &period) else {
                    continue;
                };
                let Some(margin) = safe_ratio(numerator.value, revenue.value) else {
                    continue;
                };

                if margin > self.margin_max || margin < self.margin_min {
                    warn!("{display_name} of {margin} at {period} is outside configured bounds");
                }

                ratio_metrics.push(ratio_metric(
                    &format!("{id_prefix}_{period}"),
                    display_name,
                    margin,
                    numerator,
                    &format!("{} / Revenue", numerator_key_display(numerator_key)),
                    String::new(),
                ));
            }
        }

        ratio_metrics
    }

    fn leverage_ratios(&self, by_period: &MetricsByPeriod<'_>) -> Vec<FinancialMetric> {
        let mut ratio_metrics = Vec::new();

        for period in all_periods(by_period) {
            let debt = ["net_debt", "total_debt"]
                .iter()
                .find_map(|key| lookup(by_period, key, &period).map(|m| (*key, m)));

            if let (Some((debt_key, debt)), Some(ebitda)) =
                (debt, lookup(by_period, "ebitda", &period))
            {
                if let Some(ratio) = safe_ratio(debt.value, ebitda.value) {
                    ratio_metrics.push(ratio_metric(
                        &format!("debt_to_ebitda_{period}"),
                        "Net Debt / EBITDA",
                        ratio,
                        debt,
                        &format!("{} / EBITDA", numerator_key_display(debt_key)),
                        "ratio".to_string(),
                    ));
                }
            }

            if let (Some(debt), Some(equity)) = (
                lookup(by_period, "total_debt", &period),
                lookup(by_period, "total_equity", &period),
            ) {
                if let Some(ratio) = safe_ratio(debt.value, equity.value) {
                    ratio_metrics.push(ratio_metric(
                        &format!("debt_to_equity_{period}"),
                        "Debt-to-Equity",
                        ratio,
                        debt,
                        "Total Debt / Total Equity",
                        "ratio".to_string(),
                    ));
                }
            }
        }

        ratio_metrics
    }

    fn liquidity_ratios(&self, by_period: &MetricsByPeriod<'_>) -> Vec<FinancialMetric> {
        let mut ratio_metrics = Vec::new();

        for period in all_periods(by_period) {
            if let (Some(assets), Some(liabilities)) = (
                lookup(by_period, "current_assets", &period),
                lookup(by_period, "current_liabilities", &period),
            ) {
                if let Some(ratio) = safe_ratio(assets.value, liabilities.value) {
                    ratio_metrics.push(ratio_metric(
                        &format!("current_ratio_{period}"),
                        "Current Ratio",
                        ratio,
                        assets,
                        "Current Assets / Current Liabilities",
                        "ratio".to_string(),
                    ));
                }
            }

            let cash = ["cash", "cash_and_equivalents", "cash_and_cash_equivalents"]
                .iter()
                .find_map(|key| lookup(by_period, key, &period));

            if let (Some(cash), Some(liabilities)) =
                (cash, lookup(by_period, "current_liabilities", &period))
            {
                if let Some(ratio) = safe_ratio(cash.value, liabilities.value) {
                    ratio_metrics.push(ratio_metric(
                        &format!("cash_ratio_{period}"),
                        "Cash Ratio",
                        ratio,
                        cash,
                        "Cash / Current Liabilities",
                        "ratio".to_string(),
                    ));
                }
            }
        }

        ratio_metrics
    }
}

/// Index metrics as label -> period key -> metric. Undated metrics are
/// excluded (they cannot join a series).
fn index_metrics(metrics: &[FinancialMetric]) -> MetricsByPeriod<'_> {
    let mut indexed: MetricsByPeriod<'_> = BTreeMap::new();

    for metric in metrics {
        let Some(period_end) = metric.period_end_date else {
            debug!("metric {} has no period, excluded from derivation", metric.metric_id);
            continue;
        };
        let label = metric.metric_name.to_lowercase().replace(' ', "_");
        indexed
            .entry(label)
            .or_default()
            .insert(period_end.year().to_string(), metric);
    }

    indexed
}

fn all_periods(by_period: &MetricsByPeriod<'_>) -> BTreeSet<String> {
    by_period
        .values()
        .flat_map(|periods| periods.keys().cloned())
        .collect()
}

fn lookup<'a>(
    by_period: &MetricsByPeriod<'a>,
    label: &str,
    period: &str,
) -> Option<&'a FinancialMetric> {
    by_period.get(label).and_then(|periods| periods.get(period)).copied()
}

fn safe_ratio(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator.is_zero() {
        return None;
    }
    Some(numerator / denominator)
}

fn numerator_key_display(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn ratio_metric(
    metric_id: &str,
    metric_name: &str,
    value: Decimal,
    basis: &FinancialMetric,
    formula: &str,
    currency: String,
) -> FinancialMetric {
    FinancialMetric {
        metric_id: metric_id.to_string(),
        metric_name: metric_name.to_string(),
        value,
        currency,
        scale: Scale::Actual,
        period_end_date: basis.period_end_date,
        entity_type: basis.entity_type,
        extraction_method: ExtractionMethod::Calculated,
        confidence_score: None,
        llm_reasoning: None,
        llm_confidence: None,
        notes: Some(format!("Formula: {formula}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn metric(name: &str, value: Decimal, year: i32) -> FinancialMetric {
        FinancialMetric {
            metric_id: format!("{name}_{year}"),
            metric_name: name.to_string(),
            value,
            currency: "GBP".to_string(),
            scale: Scale::Millions,
            period_end_date: NaiveDate::from_ymd_opt(year, 12, 31),
            entity_type: EntityType::Consolidated,
            extraction_method: ExtractionMethod::Table,
            confidence_score: None,
            llm_reasoning: None,
            llm_confidence: None,
            notes: None,
        }
    }

    #[test]
    fn test_revenue_growth_yoy_is_exact() {
        let metrics = vec![
            metric("revenue", dec!(1100), 2023),
            metric("revenue", dec!(1000), 2022),
        ];

        let derived = DerivedMetricsComputer::default().compute_all(&metrics);
        let growth = derived
            .iter()
            .find(|m| m.metric_name == "Revenue Growth YoY")
            .unwrap();

        assert_eq!(growth.value, dec!(0.10));
        assert_eq!(growth.scale, Scale::Actual);
        assert_eq!(growth.extraction_method, ExtractionMethod::Calculated);
        assert_eq!(
            growth.period_end_date,
            NaiveDate::from_ymd_opt(2023, 12, 31)
        );
        assert_eq!(growth.notes.as_deref(), Some("Calculated from 2022 to 2023"));
    }

    #[test]
    fn test_growth_skips_zero_prior() {
        let metrics = vec![
            metric("revenue", dec!(1100), 2023),
            metric("revenue", dec!(0), 2022),
        ];

        let derived = DerivedMetricsComputer::default().compute_all(&metrics);
        assert!(derived.iter().all(|m| m.metric_name != "Revenue Growth YoY"));
    }

    #[test]
    fn test_out_of_bounds_growth_still_emitted() {
        let metrics = vec![
            metric("revenue", dec!(10000), 2023),
            metric("revenue", dec!(100), 2022),
        ];

        let derived = DerivedMetricsComputer::default().compute_all(&metrics);
        let growth = derived
            .iter()
            .find(|m| m.metric_name == "Revenue Growth YoY")
            .unwrap();
        assert_eq!(growth.value, dec!(99));
    }

    #[test]
    fn test_multi_year_growth_series_in_period_order() {
        let metrics = vec![
            metric("revenue", dec!(1210), 2024),
            metric("revenue", dec!(1000), 2022),
            metric("revenue", dec!(1100), 2023),
        ];

        let derived = DerivedMetricsComputer::default().compute_all(&metrics);
        let growth: Vec<&FinancialMetric> = derived
            .iter()
            .filter(|m| m.metric_name == "Revenue Growth YoY")
            .collect();
        assert_eq!(growth.len(), 2);
        assert!(growth[0].period_end_date < growth[1].period_end_date);
        assert_eq!(growth[0].value, dec!(0.10));
        assert_eq!(growth[1].value, dec!(0.10));
    }

    #[test]
    fn test_profitability_margins() {
        let metrics = vec![
            metric("revenue", dec!(1000), 2023),
            metric("ebitda", dec!(250), 2023),
            metric("net_income", dec!(100), 2023),
            metric("operating_profit", dec!(200), 2023),
        ];

        let derived = DerivedMetricsComputer::default().compute_all(&metrics);
        let find = |name: &str| derived.iter().find(|m| m.metric_name == name).unwrap();

        assert_eq!(find("EBITDA Margin").value, dec!(0.25));
        assert_eq!(find("Net Margin").value, dec!(0.1));
        assert_eq!(find("Operating Margin").value, dec!(0.2));
        assert!(find("EBITDA Margin").notes.as_deref().unwrap().contains("Formula:"));
    }

    #[test]
    fn test_leverage_prefers_net_debt() {
        let metrics = vec![
            metric("net_debt", dec!(500), 2023),
            metric("total_debt", dec!(600), 2023),
            metric("ebitda", dec!(250), 2023),
            metric("total_equity", dec!(1200), 2023),
        ];

        let derived = DerivedMetricsComputer::default().compute_all(&metrics);
        let debt_to_ebitda = derived
            .iter()
            .find(|m| m.metric_name == "Net Debt / EBITDA")
            .unwrap();
        assert_eq!(debt_to_ebitda.value, dec!(2));
        assert_eq!(debt_to_ebitda.notes.as_deref(), Some("Formula: Net Debt / EBITDA"));

        let debt_to_equity = derived
            .iter()
            .find(|m| m.metric_name == "Debt-to-Equity")
            .unwrap();
        assert_eq!(debt_to_equity.value, dec!(0.5));
    }

    #[test]
    fn test_liquidity_ratios_with_cash_key_fallback() {
        let metrics = vec![
            metric("current_assets", dec!(300), 2023),
            metric("current_liabilities", dec!(150), 2023),
            metric("cash_and_cash_equivalents", dec!(75), 2023),
        ];

        let derived = DerivedMetricsComputer::default().compute_all(&metrics);
        let current_ratio = derived
            .iter()
            .find(|m| m.metric_name == "Current Ratio")
            .unwrap();
        assert_eq!(current_ratio.value, dec!(2));

        let cash_ratio = derived.iter().find(|m| m.metric_name == "Cash Ratio").unwrap();
        assert_eq!(cash_ratio.value, dec!(0.5));
    }

    #[test]
    fn test_zero_denominator_skips_ratio() {
        let metrics = vec![
            metric("current_assets", dec!(300), 2023),
            metric("current_liabilities", dec!(0), 2023),
        ];

        let derived = DerivedMetricsComputer::default().compute_all(&metrics);
        assert!(derived.iter().all(|m| m.metric_name != "Current Ratio"));
    }

    #[test]
    fn test_rerun_is_bit_identical() {
        let metrics = vec![
            metric("revenue", dec!(1100), 2023),
            metric("revenue", dec!(1000), 2022),
            metric("ebitda", dec!(250), 2023),
            metric("net_debt", dec!(500), 2023),
        ];

        let computer = DerivedMetricsComputer::default();
        let first = computer.compute_all(&metrics);
        let second = computer.compute_all(&metrics);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.metric_id, b.metric_id);
            assert_eq!(a.value, b.value);
            assert_eq!(a.metric_name, b.metric_name);
        }
    }
}
