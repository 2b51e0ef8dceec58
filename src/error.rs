use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Query execution error: {message}\nSQL: {sql}")]
    QueryExecution { sql: String, message: String },

    #[error("SQL synthesis error: {0}")]
    Synthesis(String),

    #[error("Narration error: {0}")]
    Narration(String),

    #[error("Failed to ingest table {table}: {message}")]
    Ingestion { table: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),
}

impl PipelineError {
    /// The generated statement, for errors raised while running one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            PipelineError::QueryExecution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// Failures of the generative-text backend.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM API call failed: {0}")]
    Transport(String),

    #[error("LLM API call timed out after {0}s")]
    Timeout(u64),

    #[error("LLM API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse LLM response: {0}")]
    Malformed(String),

    #[error("LLM returned an empty completion")]
    EmptyCompletion,

    #[error("LLM response was filtered by content policy")]
    ContentFiltered,
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        PipelineError::Narration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
