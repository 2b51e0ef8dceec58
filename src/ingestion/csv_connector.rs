//! CSV Connector - Reads comma-separated text into a raw table

use crate::error::Result;
use crate::ingestion::connector::TableConnector;
use crate::table::{RawTable, Value};
use csv::ReaderBuilder;
use std::path::Path;

/// CSV Connector - Wraps CSV text from an upload or a file on disk.
pub struct CsvConnector {
    source_id: String,
    source_uri: Option<String>,
    csv_text: String,
}

impl CsvConnector {
    pub fn new(source_id: String, csv_text: String) -> Self {
        Self {
            source_id,
            source_uri: None,
            csv_text,
        }
    }

    pub fn from_path(source_id: String, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let csv_text = std::fs::read_to_string(path)?;
        Ok(Self {
            source_id,
            source_uri: Some(path.display().to_string()),
            csv_text,
        })
    }

    fn coerce_cell(s: &str) -> Value {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }

        if trimmed.eq_ignore_ascii_case("true") {
            return Value::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Value::Boolean(false);
        }

        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Integer(i);
        }

        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Value::Real(f);
            }
        }

        Value::Text(trimmed.to_string())
    }
}

impl TableConnector for CsvConnector {
    fn read_table(&mut self) -> Result<RawTable> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(self.csv_text.as_bytes());

        // Headers are kept verbatim; the normalizer owns renaming.
        let headers = rdr
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result?;
            rows.push(record.iter().map(Self::coerce_cell).collect());
        }

        Ok(RawTable::from_rows(headers, rows))
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn source_type(&self) -> &str {
        "csv"
    }

    fn source_uri(&self) -> Option<&str> {
        self.source_uri.as_deref()
    }
}
