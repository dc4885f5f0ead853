use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Invalid input document: {0}")]
    InputInvalid(String),

    #[error("Parser backend '{backend}' failed: {message}")]
    BackendFailure { backend: String, message: String },

    #[error("Stage '{0}' produced no output")]
    ExtractionEmpty(String),

    #[error("LLM adjudication failed: {0}")]
    AdjudicationFailure(String),

    #[error("Numeric error: {0}")]
    NumericError(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Export failed: {0}")]
    ExportError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
