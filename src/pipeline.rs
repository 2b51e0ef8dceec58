//! Query-time orchestration: question -> SQL -> rows -> {insight, chart}.
//!
//! Every question gets its own [`QueryContext`] built from the store's current
//! state; nothing is carried between requests.

use crate::chart::{Chart, ChartSelector};
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::narrator::InsightNarrator;
use crate::store::{ExecutionOutcome, SchemaDescriptor, StoreGateway};
use crate::synthesizer::QuerySynthesizer;
use crate::table::Value;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const EXAMPLE_QUESTIONS: &[&str] = &[
    "What is my total sales?",
    "Calculate the RoAS (Return on Ad Spend)",
    "Which product had the highest CPC (Cost Per Click)?",
    "Show me the top 5 products by ad sales",
    "What is the average CTR (Click Through Rate)?",
    "Which products are not eligible for advertising?",
    "Show the trend of daily sales over time",
    "What is the share of ad spend by product?",
    "Show the relationship between ad spend and ad sales",
    "What is the distribution of units sold?",
];

/// State for one question, passed explicitly between stages.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub request_id: Uuid,
    pub question: String,
    pub schema: SchemaDescriptor,
}

impl QueryContext {
    pub fn new(question: &str, schema: SchemaDescriptor) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            question: question.trim().to_string(),
            schema,
        }
    }
}

/// The bundle returned for one question.
#[derive(Debug, Clone, Serialize)]
pub struct InsightResponse {
    pub request_id: Uuid,
    pub question: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub insight: String,
    pub chart: Option<Chart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<usize>,
}

pub struct InsightPipeline {
    store: StoreGateway,
    synthesizer: QuerySynthesizer,
    narrator: InsightNarrator,
    charts: ChartSelector,
}

impl InsightPipeline {
    pub fn new(store: StoreGateway, generator: Arc<dyn TextGenerator>) -> Self {
        Self::with_selector(store, generator, ChartSelector::default())
    }

    pub fn with_selector(store: StoreGateway, generator: Arc<dyn TextGenerator>, charts: ChartSelector) -> Self {
        Self {
            store,
            synthesizer: QuerySynthesizer::new(generator.clone()),
            narrator: InsightNarrator::new(generator),
            charts,
        }
    }

    pub fn store(&self) -> &StoreGateway {
        &self.store
    }

    /// Fresh context for a question, reading the schema as it is right now.
    pub fn context(&self, question: &str) -> Result<QueryContext> {
        Ok(QueryContext::new(question, self.store.describe_schema()?))
    }

    /// Answer one question. Synthesis and execution failures abort the
    /// request; narration failures become placeholder text.
    pub async fn ask(&self, question: &str) -> Result<InsightResponse> {
        let ctx = self.context(question)?;
        let span = info_span!("ask", request_id = %ctx.request_id);
        self.run(ctx).instrument(span).await
    }

    async fn run(&self, ctx: QueryContext) -> Result<InsightResponse> {
        info!("Processing question: {}", ctx.question);

        let sql = self.synthesizer.synthesize(&ctx.question, &ctx.schema).await?;

        match self.store.execute(sql.as_str())? {
            ExecutionOutcome::Write(summary) => {
                info!("Statement affected {} rows", summary.rows_affected);
                Ok(InsightResponse {
                    request_id: ctx.request_id,
                    question: ctx.question,
                    sql: sql.into_string(),
                    columns: Vec::new(),
                    rows: Vec::new(),
                    insight: format!(
                        "Query executed successfully. {} rows affected.",
                        summary.rows_affected
                    ),
                    chart: None,
                    affected_rows: Some(summary.rows_affected),
                })
            }
            ExecutionOutcome::Rows(result) => {
                info!("Query returned {} rows", result.row_count());
                let insight = self.narrator.narrate(&ctx.question, &result).await;
                let chart = self.charts.select_and_build(&ctx.question, &result);

                Ok(InsightResponse {
                    request_id: ctx.request_id,
                    question: ctx.question,
                    sql: sql.into_string(),
                    columns: result.columns,
                    rows: result.rows,
                    insight,
                    chart,
                    affected_rows: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartFamily;
    use crate::error::{LlmError, PipelineError};
    use crate::ingestion::{ingest_upload, DatasetKind, SourceFormat};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replies in order; an exhausted script behaves like an empty completion.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<std::result::Result<String, LlmError>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<std::result::Result<&str, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedLlm {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, LlmError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyCompletion))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn pipeline(dir: &TempDir, replies: Vec<std::result::Result<&str, LlmError>>) -> InsightPipeline {
        let store = StoreGateway::open(dir.path().join("ecommerce.db")).unwrap();
        ingest_upload(
            &store,
            DatasetKind::TotalSales,
            SourceFormat::Csv,
            "date,item_id,total_sales,total_units_ordered\n\
             2025-06-01,A1,100.0,2\n\
             2025-06-02,A2,250.0,5\n\
             2025-06-02,A1,50.0,1\n",
        )
        .unwrap();
        InsightPipeline::new(store, ScriptedLlm::new(replies))
    }

    #[tokio::test]
    async fn test_ask_returns_full_bundle() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(
            &dir,
            vec![
                Ok("```sql\nSELECT item_id, SUM(total_sales) AS sales FROM total_sales_metrics GROUP BY item_id ORDER BY item_id\n```"),
                Ok("A2 leads sales."),
            ],
        );

        let response = pipeline.ask("Sales by item").await.unwrap();

        assert!(response.sql.starts_with("SELECT item_id"));
        assert_eq!(response.columns, vec!["item_id", "sales"]);
        assert_eq!(response.rows.len(), 2);
        assert_eq!(response.rows[0][1], Value::Real(150.0));
        assert_eq!(response.insight, "A2 leads sales.");
        assert_eq!(response.chart.unwrap().family, ChartFamily::Bar);
        assert!(response.affected_rows.is_none());
    }

    #[tokio::test]
    async fn test_narration_failure_keeps_rows_and_chart() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(
            &dir,
            vec![
                Ok("SELECT item_id, total_sales FROM total_sales_metrics"),
                Err(LlmError::Timeout(60)),
            ],
        );

        let response = pipeline.ask("sales per item").await.unwrap();

        assert_eq!(response.rows.len(), 3);
        assert!(response.insight.starts_with("Error generating business insights:"));
        assert!(response.chart.is_some());
    }

    #[tokio::test]
    async fn test_execution_failure_carries_generated_sql() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, vec![Ok("SELECT * FROM nonexistent_table")]);

        let err = pipeline.ask("anything").await.unwrap_err();

        assert!(matches!(err, PipelineError::QueryExecution { .. }));
        assert_eq!(err.sql(), Some("SELECT * FROM nonexistent_table"));
        assert!(err.to_string().contains("no such table"));
    }

    #[tokio::test]
    async fn test_chained_statements_fail_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(
            &dir,
            vec![Ok("DELETE FROM total_sales_metrics; SELECT COUNT(*) FROM total_sales_metrics")],
        );

        let err = pipeline.ask("how many sales rows?").await.unwrap_err();

        assert!(matches!(err, PipelineError::QueryExecution { .. }));
        assert_eq!(
            err.sql(),
            Some("DELETE FROM total_sales_metrics; SELECT COUNT(*) FROM total_sales_metrics")
        );
        let schema = pipeline.store().describe_schema().unwrap();
        assert_eq!(schema.table("total_sales_metrics").unwrap().row_count, 3);
    }

    #[tokio::test]
    async fn test_empty_synthesis_is_an_error() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, vec![Err(LlmError::EmptyCompletion)]);

        let err = pipeline.ask("anything").await.unwrap_err();

        assert!(matches!(err, PipelineError::Synthesis(_)));
    }

    #[tokio::test]
    async fn test_write_statement_reports_affected_rows() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(
            &dir,
            vec![Ok("DELETE FROM total_sales_metrics WHERE item_id = 'A1'")],
        );

        let response = pipeline.ask("remove A1").await.unwrap();

        assert_eq!(response.affected_rows, Some(2));
        assert!(response.rows.is_empty());
        assert!(response.chart.is_none());
        assert_eq!(response.insight, "Query executed successfully. 2 rows affected.");
    }

    #[test]
    fn test_context_is_fresh_per_question() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, vec![]);

        let a = pipeline.context("q1").unwrap();
        let b = pipeline.context("q1").unwrap();

        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.schema.table_names(), vec!["total_sales_metrics"]);
    }
}
