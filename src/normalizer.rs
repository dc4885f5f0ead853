use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::currency::{NormalizedValue, ValueNormalizer};
use crate::periods::{LabelStandardizer, PeriodParser};
use crate::schema::{CandidateValue, EntityType, FinancialMetric, Scale};

/// One observation in a metric time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub period_end_date: NaiveDate,
    pub value: Decimal,
    pub currency: String,
    pub scale: Scale,
    pub entity_type: EntityType,
}

/// Result of normalizing a metric set, with optional original-value records
/// keyed by metric id.
#[derive(Debug, Clone)]
pub struct NormalizedMetrics {
    pub metrics: Vec<FinancialMetric>,
    pub originals: HashMap<String, NormalizedValue>,
}

/// Applies currency, scale and label normalization uniformly to candidates
/// and metrics, and offers grouped views over the result.
pub struct MetricNormalizerService {
    value_normalizer: ValueNormalizer,
    label_standardizer: LabelStandardizer,
    period_parser: PeriodParser,
}

impl MetricNormalizerService {
    pub fn new(base_currency: &str, base_scale: Scale) -> Self {
        Self {
            value_normalizer: ValueNormalizer::new(base_currency, base_scale),
            label_standardizer: LabelStandardizer::new(),
            period_parser: PeriodParser::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.base_currency, config.base_scale)
    }

    pub fn period_parser(&self) -> &PeriodParser {
        &self.period_parser
    }

    /// Normalize one metric to the base (currency, scale) pair and canonical
    /// label, returning the original-value record alongside.
    pub fn normalize_metric(&self, metric: &FinancialMetric) -> (FinancialMetric, NormalizedValue) {
        let normalized_value =
            self.value_normalizer
                .normalize_value(metric.value, &metric.currency, metric.scale);

        let mut normalized = metric.clone();
        normalized.value = normalized_value.value;
        normalized.currency = normalized_value.currency.clone();
        normalized.scale = normalized_value.scale;
        normalized.metric_name = self.label_standardizer.standardize(&metric.metric_name);

        (normalized, normalized_value)
    }

    pub fn normalize_metrics(
        &self,
        metrics: &[FinancialMetric],
        preserve_original: bool,
    ) -> NormalizedMetrics {
        let mut normalized = Vec::with_capacity(metrics.len());
        let mut originals = HashMap::new();

        for metric in metrics {
            let (metric_normalized, original) = self.normalize_metric(metric);
            if preserve_original {
                originals.insert(metric.metric_id.clone(), original);
            }
            normalized.push(metric_normalized);
        }

        info!("normalized {} metrics", normalized.len());
        NormalizedMetrics {
            metrics: normalized,
            originals,
        }
    }

    /// Normalize candidate values in the same fashion.
    pub fn normalize_candidates(&self, candidates: &[CandidateValue]) -> Vec<CandidateValue> {
        candidates
            .iter()
            .map(|candidate| {
                let normalized_value = self.value_normalizer.normalize_value(
                    candidate.value,
                    &candidate.currency,
                    candidate.scale,
                );
                let mut normalized = candidate.clone();
                normalized.value = normalized_value.value;
                normalized.currency = normalized_value.currency;
                normalized.scale = normalized_value.scale;
                normalized.metric_name =
                    self.label_standardizer.standardize(&candidate.metric_name);
                normalized
            })
            .collect()
    }

    /// Group metrics by fiscal period, keyed `FY<year>`; undated metrics fall
    /// under `undated`.
    pub fn group_by_period<'a>(
        &self,
        metrics: &'a [FinancialMetric],
    ) -> BTreeMap<String, Vec<&'a FinancialMetric>> {
        let mut grouped: BTreeMap<String, Vec<&FinancialMetric>> = BTreeMap::new();
        for metric in metrics {
            let key = metric
                .period_end_date
                .map_or_else(|| "undated".to_string(), |d| format!("FY{}", d.year()));
            grouped.entry(key).or_default().push(metric);
        }
        grouped
    }

    /// Group metrics by canonical label.
    pub fn group_by_label<'a>(
        &self,
        metrics: &'a [FinancialMetric],
    ) -> BTreeMap<String, Vec<&'a FinancialMetric>> {
        let mut grouped: BTreeMap<String, Vec<&FinancialMetric>> = BTreeMap::new();
        for metric in metrics {
            grouped
                .entry(metric.metric_name.clone())
                .or_default()
                .push(metric);
        }
        grouped
    }

    /// Build the dated time series for one canonical label, ascending by
    /// period end.
    pub fn time_series(&self, metrics: &[FinancialMetric], label: &str) -> Vec<TimeSeriesPoint> {
        let canonical = self.label_standardizer.standardize(label);

        let mut points: Vec<TimeSeriesPoint> = metrics
            .iter()
            .filter(|m| m.metric_name == canonical)
            .filter_map(|m| {
                m.period_end_date.map(|period_end_date| TimeSeriesPoint {
                    period_end_date,
                    value: m.value,
                    currency: m.currency.clone(),
                    scale: m.scale,
                    entity_type: m.entity_type,
                })
            })
            .collect();

        points.sort_by_key(|p| p.period_end_date);
        points
    }

    /// All metrics share the configured base currency and scale.
    pub fn is_consistent(&self, metrics: &[FinancialMetric]) -> bool {
        metrics.iter().all(|m| {
            m.currency == self.value_normalizer.base_currency()
                && m.scale == self.value_normalizer.base_scale()
        })
    }
}
