//! Ingestion Module - loads the three e-commerce datasets into the store
//!
//! Each dataset is read by a connector, cleaned by the normalizer and written
//! to its fixed table with full-overwrite semantics. Datasets are independent:
//! a batch reports one outcome per dataset and one failure never hides another.

pub mod connector;
pub mod csv_connector;
pub mod excel_connector;
pub mod json_connector;
pub mod normalizer;

pub use connector::TableConnector;
pub use csv_connector::CsvConnector;
pub use excel_connector::ExcelConnector;
pub use json_connector::JsonConnector;
pub use normalizer::normalize;

use crate::error::{PipelineError, Result};
use crate::store::StoreGateway;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    AdSales,
    TotalSales,
    Eligibility,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 3] = [DatasetKind::AdSales, DatasetKind::TotalSales, DatasetKind::Eligibility];

    /// Destination table in the store.
    pub fn table_name(self) -> &'static str {
        match self {
            DatasetKind::AdSales => "ad_sales_metrics",
            DatasetKind::TotalSales => "total_sales_metrics",
            DatasetKind::Eligibility => "eligibility_table",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            DatasetKind::AdSales => "ad_sales",
            DatasetKind::TotalSales => "total_sales",
            DatasetKind::Eligibility => "eligibility",
        }
    }

    /// Columns the source file is expected to carry, after renaming.
    pub fn expected_columns(self) -> &'static [&'static str] {
        match self {
            DatasetKind::AdSales => &[
                "date",
                "item_id",
                "ad_sales",
                "impressions",
                "ad_spend",
                "clicks",
                "units_sold",
            ],
            DatasetKind::TotalSales => &["date", "item_id", "total_sales", "total_units_ordered"],
            DatasetKind::Eligibility => &["eligibility_datetime_utc", "item_id", "eligibility", "message"],
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            DatasetKind::AdSales => "Advertising performance metrics",
            DatasetKind::TotalSales => "Total sales metrics",
            DatasetKind::Eligibility => "Product advertising eligibility",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DatasetKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        DatasetKind::ALL
            .into_iter()
            .find(|k| k.key() == s || k.table_name() == s)
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "Unknown dataset '{}', expected one of: ad_sales, total_sales, eligibility",
                    s
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,
    Json,
    Xlsx,
}

impl SourceFormat {
    /// File extensions, in the order a data directory is searched.
    pub const EXTENSIONS: [&'static str; 4] = ["csv", "json", "xlsx", "xls"];

    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "csv" => Some(SourceFormat::Csv),
            "json" => Some(SourceFormat::Json),
            "xlsx" | "xls" => Some(SourceFormat::Xlsx),
            _ => None,
        }
    }
}

impl FromStr for SourceFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "json" => Ok(SourceFormat::Json),
            "xlsx" | "xls" | "excel" => Ok(SourceFormat::Xlsx),
            other => Err(PipelineError::Config(format!("Unsupported source format '{}'", other))),
        }
    }
}

/// What one dataset load did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub dataset: DatasetKind,
    pub table: String,
    pub source: String,
    pub raw_rows: usize,
    pub rows: usize,
    pub columns: Vec<String>,
    /// Expected columns absent from the source; reported, never fatal.
    pub missing_columns: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

/// Read, normalize and store one dataset.
pub fn ingest_connector(
    store: &StoreGateway,
    kind: DatasetKind,
    connector: &mut dyn TableConnector,
) -> Result<IngestionReport> {
    let table = kind.table_name();
    let wrap = |e: PipelineError| PipelineError::Ingestion {
        table: table.to_string(),
        message: e.to_string(),
    };

    let source = connector
        .source_uri()
        .unwrap_or_else(|| connector.source_id())
        .to_string();
    info!("Ingesting {} from {} ({})", table, source, connector.source_type());

    let raw = connector.read_table().map_err(wrap)?;
    info!(
        "Original data shape: ({}, {})",
        raw.row_count(),
        raw.columns.len()
    );

    let normalized = normalize(&raw).map_err(wrap)?;
    info!(
        "Cleaned data shape: ({}, {})",
        normalized.row_count(),
        normalized.columns().len()
    );

    let columns: Vec<String> = normalized.column_names().into_iter().map(String::from).collect();
    let missing_columns: Vec<String> = kind
        .expected_columns()
        .iter()
        .filter(|c| !columns.iter().any(|have| have == *c))
        .map(|c| c.to_string())
        .collect();
    if !missing_columns.is_empty() {
        warn!("{} is missing expected columns: {}", table, missing_columns.join(", "));
    }

    store.replace_table(table, &normalized).map_err(wrap)?;

    Ok(IngestionReport {
        dataset: kind,
        table: table.to_string(),
        source,
        raw_rows: raw.row_count(),
        rows: normalized.row_count(),
        columns,
        missing_columns,
        loaded_at: Utc::now(),
    })
}

/// Ingest an uploaded document held in memory. Workbook uploads arrive as
/// base64 text.
pub fn ingest_upload(
    store: &StoreGateway,
    kind: DatasetKind,
    format: SourceFormat,
    content: &str,
) -> Result<IngestionReport> {
    let source_id = format!("upload:{}", kind.key());
    match format {
        SourceFormat::Xlsx => {
            let bytes = STANDARD
                .decode(content.trim())
                .map_err(|e| PipelineError::Ingestion {
                    table: kind.table_name().to_string(),
                    message: format!("Workbook upload is not valid base64: {}", e),
                })?;
            let mut connector = ExcelConnector::new(source_id, bytes);
            ingest_connector(store, kind, &mut connector)
        }
        SourceFormat::Csv => {
            let mut connector = CsvConnector::new(source_id, content.to_string());
            ingest_connector(store, kind, &mut connector)
        }
        SourceFormat::Json => {
            let mut connector = JsonConnector::from_text(source_id, content).map_err(|e| {
                PipelineError::Ingestion {
                    table: kind.table_name().to_string(),
                    message: e.to_string(),
                }
            })?;
            ingest_connector(store, kind, &mut connector)
        }
    }
}

/// Ingest a file, choosing the reader by extension.
pub fn ingest_file(store: &StoreGateway, kind: DatasetKind, path: &Path) -> Result<IngestionReport> {
    let table = kind.table_name();
    let wrap = |e: PipelineError| PipelineError::Ingestion {
        table: table.to_string(),
        message: e.to_string(),
    };

    let format = SourceFormat::from_path(path).ok_or_else(|| PipelineError::Ingestion {
        table: table.to_string(),
        message: format!("Unsupported file type: {}", path.display()),
    })?;

    let source_id = format!("file:{}", kind.key());
    match format {
        SourceFormat::Csv => {
            let mut connector = CsvConnector::from_path(source_id, path).map_err(wrap)?;
            ingest_connector(store, kind, &mut connector)
        }
        SourceFormat::Json => {
            let mut connector = JsonConnector::from_path(source_id, path).map_err(wrap)?;
            ingest_connector(store, kind, &mut connector)
        }
        SourceFormat::Xlsx => {
            let mut connector = ExcelConnector::from_path(source_id, path).map_err(wrap)?;
            ingest_connector(store, kind, &mut connector)
        }
    }
}

/// Ingest several datasets; each outcome is reported separately.
pub fn ingest_batch(
    store: &StoreGateway,
    sources: Vec<(DatasetKind, PathBuf)>,
) -> Vec<(DatasetKind, Result<IngestionReport>)> {
    sources
        .into_iter()
        .map(|(kind, path)| {
            let outcome = ingest_file(store, kind, &path);
            match &outcome {
                Ok(report) => info!("Loaded {} rows into {}", report.rows, report.table),
                Err(e) => warn!("{}", e),
            }
            (kind, outcome)
        })
        .collect()
}

/// Default file for a dataset in a data directory: `<table>.csv`, then
/// `.json`, `.xlsx` and `.xls`.
pub fn locate(dir: &Path, kind: DatasetKind) -> Option<PathBuf> {
    SourceFormat::EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", kind.table_name(), ext)))
        .find(|p| p.is_file())
}

/// Batch-load every dataset found in `dir`. Datasets with no file are reported
/// as failures so a partial load is visible.
pub fn ingest_directory(store: &StoreGateway, dir: &Path) -> Vec<(DatasetKind, Result<IngestionReport>)> {
    let mut outcomes = Vec::new();
    let mut found = Vec::new();
    for kind in DatasetKind::ALL {
        match locate(dir, kind) {
            Some(path) => found.push((kind, path)),
            None => outcomes.push((
                kind,
                Err(PipelineError::Ingestion {
                    table: kind.table_name().to_string(),
                    message: format!(
                        "no {}.{{{}}} in {}",
                        kind.table_name(),
                        SourceFormat::EXTENSIONS.join(","),
                        dir.display()
                    ),
                }),
            )),
        }
    }
    outcomes.extend(ingest_batch(store, found));
    outcomes.sort_by_key(|(kind, _)| DatasetKind::ALL.iter().position(|k| k == kind));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;
    use tempfile::TempDir;

    const AD_SALES_CSV: &str = "\
Date,Item ID,Ad Sales,Impressions,Ad Spend,Clicks,Units Sold
2025-06-01,A1,120.5,1000,30.0,25,4
2025-06-01,A2,80,500,40.0,,2
,,,,,,
";

    fn store(dir: &TempDir) -> StoreGateway {
        StoreGateway::open(dir.path().join("ecommerce.db")).unwrap()
    }

    #[test]
    fn test_ingest_upload_writes_fixed_table() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let report = ingest_upload(&store, DatasetKind::AdSales, SourceFormat::Csv, AD_SALES_CSV).unwrap();

        assert_eq!(report.table, "ad_sales_metrics");
        assert_eq!(report.raw_rows, 3);
        assert_eq!(report.rows, 2);
        assert!(report.missing_columns.is_empty());

        let result = store
            .query("SELECT clicks FROM ad_sales_metrics ORDER BY item_id")
            .unwrap();
        assert_eq!(result.rows[1][0], Value::Integer(0));
    }

    #[test]
    fn test_missing_expected_columns_are_warnings() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let report = ingest_upload(
            &store,
            DatasetKind::TotalSales,
            SourceFormat::Json,
            r#"[{"date": "2025-06-01", "item_id": "A1", "total_sales": 99.5}]"#,
        )
        .unwrap();

        assert_eq!(report.missing_columns, vec!["total_units_ordered"]);
    }

    #[test]
    fn test_failure_names_the_table() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let err = ingest_upload(&store, DatasetKind::Eligibility, SourceFormat::Csv, "a,b\n,\n").unwrap_err();

        match err {
            PipelineError::Ingestion { table, .. } => assert_eq!(table, "eligibility_table"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_directory_load_is_per_dataset() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("ad_sales_metrics.csv"), AD_SALES_CSV).unwrap();
        std::fs::write(
            data.join("eligibility_table.json"),
            r#"[{"eligibility_datetime_utc": "2025-06-01T08:00:00", "item_id": "A1", "eligibility": true, "message": ""}]"#,
        )
        .unwrap();

        let outcomes = ingest_directory(&store, &data);

        let kinds: Vec<_> = outcomes.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, DatasetKind::ALL.to_vec());
        assert!(outcomes[0].1.is_ok());
        assert!(outcomes[1].1.is_err());
        assert!(outcomes[2].1.is_ok());

        let schema = store.describe_schema().unwrap();
        assert_eq!(schema.table_names(), vec!["ad_sales_metrics", "eligibility_table"]);
    }

    fn workbook_fixture() -> Vec<u8> {
        std::fs::read(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/ad_sales_metrics.xlsx"))
            .unwrap()
    }

    #[test]
    fn test_workbook_file_is_located_and_loaded() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("ad_sales_metrics.xlsx"), workbook_fixture()).unwrap();

        let path = locate(&data, DatasetKind::AdSales).unwrap();
        assert_eq!(SourceFormat::from_path(&path), Some(SourceFormat::Xlsx));

        let report = ingest_file(&store, DatasetKind::AdSales, &path).unwrap();
        assert_eq!(report.rows, 2);
        assert!(report.missing_columns.is_empty());

        let result = store
            .query("SELECT date, clicks, ad_spend FROM ad_sales_metrics ORDER BY item_id")
            .unwrap();
        assert_eq!(
            result.rows,
            vec![
                vec![Value::from("2025-06-01"), Value::Integer(25), Value::Real(30.0)],
                vec![Value::from("2025-06-02"), Value::Integer(0), Value::Real(40.25)],
            ]
        );
    }

    #[test]
    fn test_workbook_upload_is_base64() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let encoded = STANDARD.encode(workbook_fixture());
        let report = ingest_upload(&store, DatasetKind::AdSales, SourceFormat::Xlsx, &encoded).unwrap();
        assert_eq!(report.table, "ad_sales_metrics");
        assert_eq!(report.rows, 2);

        let err = ingest_upload(&store, DatasetKind::AdSales, SourceFormat::Xlsx, "not base64!").unwrap_err();
        assert!(err.to_string().contains("not valid base64"));
    }

    #[test]
    fn test_dataset_kind_parsing() {
        assert_eq!("ad_sales".parse::<DatasetKind>().unwrap(), DatasetKind::AdSales);
        assert_eq!("eligibility_table".parse::<DatasetKind>().unwrap(), DatasetKind::Eligibility);
        assert!("orders".parse::<DatasetKind>().is_err());
        assert_eq!("XLSX".parse::<SourceFormat>().unwrap(), SourceFormat::Xlsx);
    }
}
