use async_trait::async_trait;
use insight_engine::chart::{svg, ChartData, ChartFamily};
use insight_engine::ingestion::{ingest_directory, DatasetKind};
use insight_engine::llm::TextGenerator;
use insight_engine::table::Value;
use insight_engine::{InsightPipeline, LlmError, PipelineError, StoreGateway};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Plays back canned completions and records every prompt it receives.
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<&str, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextGenerator for ScriptedBackend {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
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

fn write_datasets(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("ad_sales_metrics.csv"),
        "Date,Item ID,Ad Sales,Impressions,Ad Spend,Clicks,Units Sold\n\
         2025-06-01,A1,120.5,1000,30.0,25,4\n\
         2025-06-02,A1,80.0,800,20.0,10,2\n\
         2025-06-01,A2,60.0,1500,45.5,,1\n\
         2025-06-03,A3,0,200,5.0,2,0\n",
    )
    .unwrap();
    fs::write(
        dir.join("total_sales_metrics.csv"),
        "date,item_id,total_sales,total_units_ordered\n\
         2025-06-01,A1,300.0,6\n\
         2025-06-02,A1,150.0,3\n\
         2025-06-01,A2,90.0,2\n\
         2025-06-03,A3,40.0,1\n",
    )
    .unwrap();
    fs::write(
        dir.join("eligibility_table.json"),
        r#"[
            {"eligibility_datetime_utc": "2025-06-01T08:00:00", "item_id": "A1", "eligibility": true, "message": "Eligible"},
            {"eligibility_datetime_utc": "2025-06-01T08:00:00", "item_id": "A2", "eligibility": false, "message": "Out of stock"}
        ]"#,
    )
    .unwrap();
}

fn loaded_store(temp: &TempDir) -> StoreGateway {
    let data = temp.path().join("data");
    write_datasets(&data);
    let store = StoreGateway::open(temp.path().join("ecommerce.db")).unwrap();
    for (kind, outcome) in ingest_directory(&store, &data) {
        assert!(outcome.is_ok(), "{} failed: {:?}", kind, outcome.err());
    }
    store
}

#[test]
fn test_batch_ingestion_builds_all_three_tables() {
    let temp = TempDir::new().unwrap();
    let store = loaded_store(&temp);

    let schema = store.describe_schema().unwrap();
    assert_eq!(
        schema.table_names(),
        vec!["ad_sales_metrics", "eligibility_table", "total_sales_metrics"]
    );

    let ad = schema.table(DatasetKind::AdSales.table_name()).unwrap();
    assert_eq!(ad.row_count, 4);
    let names: Vec<_> = ad.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["date", "item_id", "ad_sales", "impressions", "ad_spend", "clicks", "units_sold"]
    );

    // Missing clicks became 0, booleans became 1/0
    let clicks = store
        .query("SELECT clicks FROM ad_sales_metrics WHERE item_id = 'A2'")
        .unwrap();
    assert_eq!(clicks.rows, vec![vec![Value::Integer(0)]]);
    let eligible = store
        .query("SELECT item_id FROM eligibility_table WHERE eligibility = 1")
        .unwrap();
    assert_eq!(eligible.rows, vec![vec![Value::from("A1")]]);
}

#[tokio::test]
async fn test_roas_question_end_to_end() {
    let temp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![
        Ok("```sql\nSELECT item_id, SUM(ad_sales) / NULLIF(SUM(ad_spend), 0) AS roas \
            FROM ad_sales_metrics GROUP BY item_id ORDER BY roas DESC\n```"),
        Ok("A1 returns the most per dollar of ad spend."),
    ]);
    let pipeline = InsightPipeline::new(loaded_store(&temp), backend.clone());

    let response = pipeline.ask("Calculate the RoAS for each product").await.unwrap();

    assert_eq!(response.columns, vec!["item_id", "roas"]);
    assert_eq!(response.rows.len(), 3);
    assert_eq!(response.rows[0][0], Value::from("A1"));
    assert_eq!(response.insight, "A1 returns the most per dollar of ad spend.");

    let chart = response.chart.expect("bar chart");
    assert_eq!(chart.family, ChartFamily::Bar);
    assert_eq!((chart.x_label.as_str(), chart.y_label.as_str()), ("item_id", "roas"));
    assert!(svg::render(&chart).contains("<rect x="));

    // The synthesis prompt was built from the live schema
    let prompts = backend.prompts.lock().unwrap();
    assert!(prompts[0].contains("Table: eligibility_table (2 rows)"));
    assert!(prompts[0].contains("Question: Calculate the RoAS for each product"));
    assert!(prompts[1].contains("Statistical summary"));
}

#[tokio::test]
async fn test_trend_question_sorts_line_points() {
    let temp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![
        Ok("SELECT CAST(julianday(date) AS INTEGER) AS date_ordinal, SUM(total_sales) AS sales \
            FROM total_sales_metrics GROUP BY date_ordinal ORDER BY date_ordinal DESC"),
        Ok("Sales are falling."),
    ]);
    let pipeline = InsightPipeline::new(loaded_store(&temp), backend);

    let response = pipeline
        .ask("Show the trend of daily sales over time")
        .await
        .unwrap();

    let chart = response.chart.expect("line chart");
    assert_eq!(chart.family, ChartFamily::Line);
    match chart.data {
        ChartData::Xy { x, y } => {
            let xs: Vec<f64> = x.iter().filter_map(Value::as_f64).collect();
            assert_eq!(xs.len(), 3);
            assert!(xs.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(y[0], Some(390.0));
        }
        other => panic!("unexpected chart data {:?}", other),
    }
}

#[tokio::test]
async fn test_bad_sql_surfaces_statement_and_diagnostic() {
    let temp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("SELECT * FROM orders")]);
    let pipeline = InsightPipeline::new(loaded_store(&temp), backend);

    let err = pipeline.ask("Show me all orders").await.unwrap_err();

    match &err {
        PipelineError::QueryExecution { sql, message } => {
            assert_eq!(sql, "SELECT * FROM orders");
            assert!(message.contains("no such table"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_backend_fails_synthesis() {
    let temp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Err(LlmError::Transport("connection refused".to_string()))]);
    let pipeline = InsightPipeline::new(loaded_store(&temp), backend);

    let err = pipeline.ask("What is my total sales?").await.unwrap_err();

    assert!(matches!(err, PipelineError::Synthesis(_)));
}

#[tokio::test]
async fn test_reingestion_replaces_table() {
    let temp = TempDir::new().unwrap();
    let store = loaded_store(&temp);
    let data = temp.path().join("data");
    fs::write(
        data.join("total_sales_metrics.csv"),
        "date,item_id,total_sales,total_units_ordered\n2025-07-01,B1,10.0,1\n",
    )
    .unwrap();

    for (_, outcome) in ingest_directory(&store, &data) {
        outcome.unwrap();
    }

    let schema = store.describe_schema().unwrap();
    assert_eq!(schema.table("total_sales_metrics").unwrap().row_count, 1);
}

#[test]
fn test_directory_load_accepts_workbooks() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    write_datasets(&data);
    fs::remove_file(data.join("ad_sales_metrics.csv")).unwrap();
    fs::copy(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/ad_sales_metrics.xlsx"),
        data.join("ad_sales_metrics.xlsx"),
    )
    .unwrap();
    let store = StoreGateway::open(temp.path().join("ecommerce.db")).unwrap();

    for (kind, outcome) in ingest_directory(&store, &data) {
        let report = outcome.unwrap();
        if kind == DatasetKind::AdSales {
            assert!(report.source.ends_with("ad_sales_metrics.xlsx"));
            assert_eq!(report.rows, 2);
        }
    }

    let total = store
        .query("SELECT SUM(ad_spend) AS spend FROM ad_sales_metrics")
        .unwrap();
    assert_eq!(total.rows, vec![vec![Value::Real(70.25)]]);
}

#[tokio::test]
async fn test_chained_statement_reply_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok(
        "SELECT COUNT(*) AS n FROM total_sales_metrics; DROP TABLE total_sales_metrics",
    )]);
    let pipeline = InsightPipeline::new(loaded_store(&temp), backend);

    let err = pipeline.ask("How many sales rows are there?").await.unwrap_err();

    match &err {
        PipelineError::QueryExecution { message, .. } => {
            assert!(message.contains("one statement at a time"))
        }
        other => panic!("unexpected error {:?}", other),
    }
    let schema = pipeline.store().describe_schema().unwrap();
    assert_eq!(schema.table("total_sales_metrics").unwrap().row_count, 4);
}
