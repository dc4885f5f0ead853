use std::collections::BTreeMap;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::Result;
use crate::schema::{
    CandidateSource, CandidateValue, EntityType, ExtractionMethod, FinancialMetric,
    ValidationResult, ValidationStatus,
};
use crate::validator::ValidationAggregator;

use super::prompts;
use super::provider::LlmProvider;

/// The strict response shape requested from the model.
#[derive(Debug, Clone, Deserialize)]
pub struct AdjudicationResponse {
    pub selected_candidate_id: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub alternative_value: Option<Decimal>,
    #[serde(default)]
    pub flags: Option<Vec<String>>,
}

/// Selects a winner per (metric, period) group, consulting the LLM only for
/// groups with validation issues and falling back to the highest-confidence
/// candidate on any failure.
pub struct LlmAdjudicator<P> {
    provider: Option<P>,
    max_workers: usize,
}

impl<P: LlmProvider> LlmAdjudicator<P> {
    pub fn new(provider: Option<P>, max_workers: usize) -> Self {
        Self {
            provider,
            max_workers: max_workers.max(1),
        }
    }

    /// Adjudicate every candidate group against its validation results.
    ///
    /// Groups are processed in (metric, period) order; conflicted groups run
    /// concurrently, bounded by the worker count.
    pub async fn adjudicate_candidates(
        &self,
        candidates: &[CandidateValue],
        validation_results: &[ValidationResult],
    ) -> Vec<FinancialMetric> {
        let statuses = ValidationAggregator::candidate_statuses(validation_results);
        let grouped = group_candidates(candidates);

        info!(
            "adjudicating {} candidates in {} groups",
            candidates.len(),
            grouped.len()
        );

        let mut clean_winners: BTreeMap<GroupKey, FinancialMetric> = BTreeMap::new();
        let mut conflicted: Vec<(GroupKey, Vec<&CandidateValue>)> = Vec::new();

        for (key, group) in grouped {
            let needs_adjudication = group.iter().any(|candidate| {
                statuses
                    .get(&candidate.candidate_id)
                    .is_some_and(|status| *status != ValidationStatus::Valid)
            });

            if needs_adjudication {
                conflicted.push((key, group));
            } else if let Some(best) = highest_confidence(&group) {
                clean_winners.insert(key, candidate_to_metric(best, None, None, None));
            }
        }

        let adjudicated: Vec<(GroupKey, FinancialMetric)> = stream::iter(conflicted)
            .map(|(key, group)| async move {
                let metric = self.adjudicate_group(&group, validation_results).await;
                (key, metric)
            })
            .buffered(self.max_workers)
            .collect()
            .await;

        // Ordered map keyed by group keeps output deterministic.
        let mut winners = clean_winners;
        for (key, metric) in adjudicated {
            winners.insert(key, metric);
        }

        winners.into_values().collect()
    }

    async fn adjudicate_group(
        &self,
        group: &[&CandidateValue],
        validation_results: &[ValidationResult],
    ) -> FinancialMetric {
        let fallback = || {
            let best = highest_confidence(group).expect("group is never empty");
            candidate_to_metric(best, None, None, None)
        };

        let Some(provider) = &self.provider else {
            warn!("no LLM provider configured, using highest-confidence fallback");
            return fallback();
        };

        let prompt = build_group_prompt(group, validation_results);

        let response_text = match provider.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("LLM call failed, using fallback: {e}");
                return fallback();
            }
        };

        let response = match parse_adjudication_response(&response_text) {
            Ok(response) => response,
            Err(e) => {
                warn!("unparseable LLM response, using fallback: {e}");
                return fallback();
            }
        };

        let Some(selected) = group
            .iter()
            .find(|c| c.candidate_id == response.selected_candidate_id)
        else {
            warn!(
                "LLM selected unknown candidate {}, using fallback",
                response.selected_candidate_id
            );
            return fallback();
        };

        info!(
            "LLM selected {} with confidence {:.2}",
            selected.candidate_id, response.confidence
        );

        candidate_to_metric(
            selected,
            Some(response.reasoning),
            Some(response.confidence),
            response.alternative_value,
        )
    }
}

/// Winner selection without any LLM involvement: the highest-confidence
/// candidate per (metric, period) group. Used when validation found no
/// conflicts.
pub fn select_highest_confidence(candidates: &[CandidateValue]) -> Vec<FinancialMetric> {
    group_candidates(candidates)
        .into_values()
        .filter_map(|group| highest_confidence(&group))
        .map(|best| candidate_to_metric(best, None, None, None))
        .collect()
}

type GroupKey = (String, Option<NaiveDate>);

fn group_candidates(candidates: &[CandidateValue]) -> BTreeMap<GroupKey, Vec<&CandidateValue>> {
    let mut grouped: BTreeMap<GroupKey, Vec<&CandidateValue>> = BTreeMap::new();
    for candidate in candidates {
        grouped
            .entry((candidate.metric_name.clone(), candidate.period_end_date))
            .or_default()
            .push(candidate);
    }
    grouped
}

fn highest_confidence<'a>(group: &[&'a CandidateValue]) -> Option<&'a CandidateValue> {
    group
        .iter()
        .max_by(|a, b| {
            a.confidence_score
                .total_cmp(&b.confidence_score)
                .then(b.candidate_id.cmp(&a.candidate_id))
        })
        .copied()
}

fn candidate_to_metric(
    candidate: &CandidateValue,
    llm_reasoning: Option<String>,
    llm_confidence: Option<f64>,
    alternative_value: Option<Decimal>,
) -> FinancialMetric {
    FinancialMetric {
        metric_id: candidate.candidate_id.clone(),
        metric_name: candidate.metric_name.clone(),
        value: alternative_value.unwrap_or(candidate.value),
        currency: candidate.currency.clone(),
        scale: candidate.scale,
        period_end_date: candidate.period_end_date,
        entity_type: EntityType::Consolidated,
        extraction_method: match candidate.source {
            CandidateSource::TableCell => ExtractionMethod::Table,
            CandidateSource::TextBlock => ExtractionMethod::Text,
        },
        confidence_score: Some(candidate.confidence_score),
        llm_reasoning,
        llm_confidence,
        notes: None,
    }
}

fn build_group_prompt(group: &[&CandidateValue], validation_results: &[ValidationResult]) -> String {
    let first = group[0];
    let period = first
        .period_end_date
        .map_or_else(|| "Unknown".to_string(), |d| d.to_string());

    let candidates_formatted: String = group
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            format!(
                "Candidate {}:\n\
                 - ID: {}\n\
                 - Value: {} {} ({})\n\
                 - Source: {:?}\n\
                 - Confidence Score: {:.2}\n\
                 - Evidence: {}\n",
                i + 1,
                candidate.candidate_id,
                candidate.value,
                candidate.currency,
                candidate.scale,
                candidate.source,
                candidate.confidence_score,
                serde_json::to_string(&candidate.evidence).unwrap_or_default(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let group_ids: Vec<&str> = group.iter().map(|c| c.candidate_id.as_str()).collect();
    let mut issue_lines = Vec::new();
    for result in validation_results {
        if result.is_issue() && group_ids.contains(&result.candidate_id.as_str()) {
            issue_lines.push(format!(
                "- Candidate {}: {} ({})",
                result.candidate_id, result.message, result.rule_name
            ));
        }
    }
    let validation_issues = if issue_lines.is_empty() {
        "No validation issues detected.".to_string()
    } else {
        issue_lines.join("\n")
    };

    prompts::build_adjudication_prompt(
        &first.metric_name,
        &period,
        first.section_type.as_str(),
        &candidates_formatted,
        &validation_issues,
    )
}

/// Parse the model's JSON reply, tolerating markdown code fences.
pub fn parse_adjudication_response(response: &str) -> Result<AdjudicationResponse> {
    let mut cleaned = response.trim();

    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }

    let parsed: AdjudicationResponse = serde_json::from_str(cleaned.trim())?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use crate::schema::{Evidence, Scale, SectionType};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(id: &str, name: &str, value: Decimal, confidence: f64) -> CandidateValue {
        CandidateValue {
            candidate_id: id.to_string(),
            metric_name: name.to_string(),
            value,
            currency: "GBP".to_string(),
            scale: Scale::Millions,
            period_end_date: NaiveDate::from_ymd_opt(2023, 12, 31),
            section_type: SectionType::IncomeStatement,
            source: CandidateSource::TableCell,
            confidence_score: confidence,
            evidence: Evidence::default(),
            extraction_timestamp: Utc::now(),
        }
    }

    fn review_issue(candidate_id: &str) -> ValidationResult {
        ValidationResult {
            candidate_id: candidate_id.to_string(),
            rule_name: "arithmetic".to_string(),
            status: ValidationStatus::Invalid,
            severity: crate::schema::ValidationSeverity::Major,
            message: "arithmetic mismatch".to_string(),
            details: None,
        }
    }

    struct ScriptedProvider {
        response: String,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct FailingProvider;

    impl LlmProvider for FailingProvider {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(ExtractionError::AdjudicationFailure("offline".to_string()))
        }
    }

    #[test]
    fn test_parse_response_with_code_fences() {
        let raw = "```json\n{\"selected_candidate_id\": \"c1\", \"confidence\": 0.9, \"reasoning\": \"table source\"}\n```";
        let parsed = parse_adjudication_response(raw).unwrap();
        assert_eq!(parsed.selected_candidate_id, "c1");
        assert!(parsed.alternative_value.is_none());
    }

    #[test]
    fn test_parse_response_rejects_missing_fields() {
        assert!(parse_adjudication_response("{\"confidence\": 0.9}").is_err());
        assert!(parse_adjudication_response("not json at all").is_err());
    }

    #[tokio::test]
    async fn test_clean_groups_skip_llm() {
        let provider = ScriptedProvider::new("{}");
        let adjudicator = LlmAdjudicator::new(Some(provider), 2);

        let candidates = vec![
            candidate("c1", "revenue", dec!(1250.5), 0.9),
            candidate("c2", "revenue", dec!(1250.0), 0.6),
        ];

        let metrics = adjudicator.adjudicate_candidates(&candidates, &[]).await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].metric_id, "c1");
        assert_eq!(metrics[0].value, dec!(1250.5));
        assert!(metrics[0].llm_reasoning.is_none());
        assert_eq!(
            adjudicator.provider.as_ref().unwrap().calls.load(Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_llm_selects_candidate_in_conflicted_group() {
        let provider = ScriptedProvider::new(
            "{\"selected_candidate_id\": \"c2\", \"confidence\": 0.85, \"reasoning\": \"matches components\"}",
        );
        let adjudicator = LlmAdjudicator::new(Some(provider), 2);

        let candidates = vec![
            candidate("c1", "total_assets", dec!(1060), 0.9),
            candidate("c2", "total_assets", dec!(1000), 0.7),
        ];
        let validations = vec![review_issue("c1")];

        let metrics = adjudicator
            .adjudicate_candidates(&candidates, &validations)
            .await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].metric_id, "c2");
        assert_eq!(metrics[0].value, dec!(1000));
        assert_eq!(metrics[0].llm_reasoning.as_deref(), Some("matches components"));
        assert_eq!(metrics[0].llm_confidence, Some(0.85));
    }

    #[tokio::test]
    async fn test_alternative_value_overrides_candidate() {
        let provider = ScriptedProvider::new(
            "{\"selected_candidate_id\": \"c1\", \"confidence\": 0.8, \"reasoning\": \"scale slip\", \"alternative_value\": 1025.0}",
        );
        let adjudicator = LlmAdjudicator::new(Some(provider), 2);

        let candidates = vec![candidate("c1", "total_assets", dec!(1060), 0.9)];
        let validations = vec![review_issue("c1")];

        let metrics = adjudicator
            .adjudicate_candidates(&candidates, &validations)
            .await;
        assert_eq!(metrics[0].value, dec!(1025.0));
        assert_eq!(metrics[0].currency, "GBP");
        assert_eq!(metrics[0].scale, Scale::Millions);
    }

    #[tokio::test]
    async fn test_unknown_selected_id_falls_back() {
        let provider = ScriptedProvider::new(
            "{\"selected_candidate_id\": \"ghost\", \"confidence\": 0.8, \"reasoning\": \"?\"}",
        );
        let adjudicator = LlmAdjudicator::new(Some(provider), 2);

        let candidates = vec![
            candidate("c1", "total_assets", dec!(1060), 0.9),
            candidate("c2", "total_assets", dec!(1000), 0.7),
        ];
        let validations = vec![review_issue("c1")];

        let metrics = adjudicator
            .adjudicate_candidates(&candidates, &validations)
            .await;
        assert_eq!(metrics[0].metric_id, "c1");
        assert_eq!(metrics[0].value, dec!(1060));
        assert!(metrics[0].llm_reasoning.is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_highest_confidence() {
        let adjudicator = LlmAdjudicator::new(Some(FailingProvider), 2);

        let candidates = vec![
            candidate("c1", "total_assets", dec!(1060), 0.9),
            candidate("c2", "total_assets", dec!(1000), 0.7),
        ];
        let validations = vec![review_issue("c1")];

        let metrics = adjudicator
            .adjudicate_candidates(&candidates, &validations)
            .await;
        assert_eq!(metrics[0].metric_id, "c1");
        assert_eq!(metrics[0].value, dec!(1060));
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let provider = ScriptedProvider::new(
            "{\"selected_candidate_id\": \"c1\", \"confidence\": 0.8, \"reasoning\": \"ok\"}",
        );
        let adjudicator = LlmAdjudicator::new(Some(provider), 4);

        let mut c3 = candidate("c3", "revenue", dec!(1250.5), 0.9);
        c3.period_end_date = NaiveDate::from_ymd_opt(2022, 12, 31);

        let candidates = vec![
            candidate("c1", "total_assets", dec!(1060), 0.9),
            candidate("c2", "total_assets", dec!(1000), 0.7),
            c3,
        ];
        let validations = vec![review_issue("c1")];

        let metrics = adjudicator
            .adjudicate_candidates(&candidates, &validations)
            .await;
        // One adjudicated group plus one clean group.
        assert_eq!(metrics.len(), 2);
        assert_eq!(
            adjudicator.provider.as_ref().unwrap().calls.load(Ordering::SeqCst),
            1
        );
    }
}
