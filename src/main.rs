use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use insight_engine::chart::svg;
use insight_engine::config::Config;
use insight_engine::ingestion::{self, DatasetKind, IngestionReport};
use insight_engine::llm::build_generator;
use insight_engine::narrator::to_frame;
use insight_engine::pipeline::{InsightPipeline, EXAMPLE_QUESTIONS};
use insight_engine::store::{ExecutionOutcome, StoreGateway};
use insight_engine::table::QueryResult;
use insight_engine::PipelineError;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insight-engine")]
#[command(about = "Ask natural-language questions over e-commerce metrics")]
#[command(version)]
struct Args {
    /// SQLite database file (or set INSIGHT_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// API key for the text backend (or set OPENAI_API_KEY / GEMINI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Model identifier override
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load datasets into the store
    Ingest {
        /// Dataset to load from FILE: ad_sales, total_sales or eligibility
        #[arg(long, requires = "file")]
        dataset: Option<String>,

        /// CSV, JSON or Excel workbook for --dataset
        #[arg(long, requires = "dataset")]
        file: Option<PathBuf>,

        /// Directory holding <table>.csv, .json, .xlsx or .xls (or set INSIGHT_DATA_DIR)
        #[arg(long, conflicts_with = "file")]
        dir: Option<PathBuf>,
    },
    /// Answer a question with SQL, an insight and a chart
    Ask {
        question: String,

        /// Print the response bundle as JSON
        #[arg(long)]
        json: bool,

        /// Write the chart, if any, as SVG
        #[arg(long)]
        chart_svg: Option<PathBuf>,
    },
    /// Show tables, columns and row counts
    Schema {
        #[arg(long)]
        json: bool,
    },
    /// Show the first rows of a table
    Sample {
        table: String,

        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Run a SQL statement directly
    Sql { statement: String },
    /// Test the database and the text backend
    Check,
    /// List example questions
    Examples,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(key) = args.api_key {
        config.api_key = Some(key);
    }
    if let Some(model) = args.model {
        config.model = model;
    }

    let store = StoreGateway::open(&config.db_path)?;

    match args.command {
        Commands::Ingest { dataset, file, dir } => {
            let outcomes = match (dataset, file) {
                (Some(dataset), Some(file)) => {
                    let kind: DatasetKind = dataset.parse()?;
                    vec![(kind, ingestion::ingest_file(&store, kind, &file))]
                }
                _ => {
                    let dir = dir.unwrap_or_else(|| config.data_dir.clone());
                    info!("Batch loading from {}", dir.display());
                    ingestion::ingest_directory(&store, &dir)
                }
            };
            report_ingestion(&outcomes)?;
        }
        Commands::Ask {
            question,
            json,
            chart_svg,
        } => {
            let generator = build_generator(&config.llm()?)?;
            let pipeline = InsightPipeline::new(store, generator);

            let response = match pipeline.ask(&question).await {
                Ok(response) => response,
                Err(e) => {
                    if let Some(sql) = e.sql() {
                        eprintln!("Generated SQL:\n{}\n", sql);
                    }
                    return Err(e.into());
                }
            };

            if let (Some(path), Some(chart)) = (&chart_svg, &response.chart) {
                std::fs::write(path, svg::render(chart))
                    .with_context(|| format!("Failed to write chart to {}", path.display()))?;
                info!("Chart written to {}", path.display());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("=== Generated SQL ===\n{}\n", response.sql);
                match response.affected_rows {
                    Some(n) => println!("{} rows affected\n", n),
                    None => {
                        let result = QueryResult::new(response.columns.clone(), response.rows.clone());
                        println!("=== Results ({} rows) ===", result.row_count());
                        print_result(&result)?;
                    }
                }
                println!("=== Insight ===\n{}\n", response.insight);
                match &response.chart {
                    Some(chart) => println!("Chart: {} ({})", chart.title, chart.family),
                    None => println!("Chart: none for this result"),
                }
            }
        }
        Commands::Schema { json } => {
            let schema = store.describe_schema()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                print!("{}", schema);
            }
        }
        Commands::Sample { table, limit } => {
            print_result(&store.sample_rows(&table, limit)?)?;
        }
        Commands::Sql { statement } => match store.execute(&statement)? {
            ExecutionOutcome::Rows(result) => print_result(&result)?,
            ExecutionOutcome::Write(summary) => println!("{} rows affected", summary.rows_affected),
        },
        Commands::Check => {
            let db_ok = match store.ping() {
                Ok(()) => true,
                Err(e) => {
                    error!("{}", e);
                    false
                }
            };
            println!("Database ({}): {}", config.db_path.display(), status(db_ok));

            let llm_ok = match config.llm().and_then(|c| build_generator(&c)) {
                Ok(generator) => {
                    let ok = generator.ping().await;
                    println!("Text backend ({}): {}", generator.model(), status(ok));
                    ok
                }
                Err(e) => {
                    println!("Text backend: {}", e);
                    false
                }
            };

            if !(db_ok && llm_ok) {
                bail!("connection check failed");
            }
        }
        Commands::Examples => {
            for (i, q) in EXAMPLE_QUESTIONS.iter().enumerate() {
                println!("{:>2}. {}", i + 1, q);
            }
        }
    }

    Ok(())
}

fn status(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAILED"
    }
}

fn print_result(result: &QueryResult) -> Result<()> {
    let df = to_frame(result)?;
    println!("{}", df);
    Ok(())
}

fn report_ingestion(outcomes: &[(DatasetKind, Result<IngestionReport, PipelineError>)]) -> Result<()> {
    let mut failed = 0;
    for (kind, outcome) in outcomes {
        match outcome {
            Ok(report) => {
                println!(
                    "{:<12} -> {:<20} {} rows, {} columns",
                    kind.key(),
                    report.table,
                    report.rows,
                    report.columns.len()
                );
                if !report.missing_columns.is_empty() {
                    println!("             missing columns: {}", report.missing_columns.join(", "));
                }
            }
            Err(e) => {
                failed += 1;
                println!("{:<12} -> FAILED: {}", kind.key(), e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} datasets failed to load", failed, outcomes.len());
    }
    Ok(())
}
