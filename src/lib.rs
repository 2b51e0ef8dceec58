pub mod chart;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod llm;
pub mod narrator;
pub mod pipeline;
pub mod store;
pub mod synthesizer;
pub mod table;

pub use error::{LlmError, PipelineError, Result};
pub use pipeline::{InsightPipeline, InsightResponse, QueryContext};
pub use store::StoreGateway;
