//! Prompt templates for metric adjudication.

pub const ADJUDICATION_HEADER: &str = "You are a financial data extraction expert reviewing candidate values for a metric.";

pub const ADJUDICATION_TASK: &str = r#"**Task:**
1. Review all candidate values and their evidence
2. Determine which candidate is most likely correct
3. Provide clear reasoning for your decision
4. Consider: source reliability, evidence quality, consistency with financial logic

**Response Format (JSON):**
{
    "selected_candidate_id": "candidate_id",
    "confidence": 0.0-1.0,
    "reasoning": "detailed explanation",
    "alternative_value": null or numeric value if correction needed,
    "flags": ["any concerns or notes"]
}

Respond only with the JSON object, no other text."#;

pub fn build_adjudication_prompt(
    metric_name: &str,
    period: &str,
    section_type: &str,
    candidates_formatted: &str,
    validation_issues: &str,
) -> String {
    format!(
        "{ADJUDICATION_HEADER}\n\n\
         **Metric Name:** {metric_name}\n\
         **Period:** {period}\n\
         **Section Type:** {section_type}\n\n\
         **Candidates:**\n{candidates_formatted}\n\n\
         **Validation Issues:**\n{validation_issues}\n\n\
         {ADJUDICATION_TASK}"
    )
}
