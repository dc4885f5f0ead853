use serde::Deserialize;

use crate::schema::Scale;

/// Validation rule overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub yoy_growth_max: f64,
    pub yoy_growth_min: f64,
    pub margin_max: f64,
    pub margin_min: f64,
    /// Relative tolerance for arithmetic identity checks.
    pub arithmetic_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            yoy_growth_max: 5.0,
            yoy_growth_min: -0.9,
            margin_max: 1.0,
            margin_min: -1.0,
            arithmetic_tolerance: 0.05,
        }
    }
}

/// Weights used only when an embedding rescorer is installed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SectionDetectionConfig {
    pub regex_weight: f64,
    pub embedding_weight: f64,
    pub similarity_threshold: f64,
}

impl Default for SectionDetectionConfig {
    fn default() -> Self {
        Self {
            regex_weight: 0.7,
            embedding_weight: 0.3,
            similarity_threshold: 0.75,
        }
    }
}

/// Settings passed through to the LLM capability.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 4000,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

/// Bounds for the fan-out points (adapter runs, adjudication groups).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub parallel_processing: bool,
    pub max_workers: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            parallel_processing: true,
            max_workers: 4,
        }
    }
}

/// Top-level pipeline configuration.
///
/// Loading from a file or environment is left to callers; every field has a
/// default so `PipelineConfig::default()` yields a runnable setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub base_currency: String,
    pub base_scale: Scale,
    /// Adapter order for text selection and fallback mode.
    pub parser_priority: Vec<String>,
    /// Per-adapter cap in seconds.
    pub parser_timeout_secs: u64,
    pub max_file_size_mb: u64,
    pub validation: ValidationConfig,
    pub section_detection: SectionDetectionConfig,
    pub llm: LlmConfig,
    pub performance: PerformanceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_currency: "GBP".to_string(),
            base_scale: Scale::Millions,
            parser_priority: vec![
                "dense_text".to_string(),
                "layout".to_string(),
                "table_specialist".to_string(),
            ],
            parser_timeout_secs: 300,
            max_file_size_mb: 100,
            validation: ValidationConfig::default(),
            section_detection: SectionDetectionConfig::default(),
            llm: LlmConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}
