//! JSON Connector - Reads an array of flat JSON records into a raw table

use crate::error::{PipelineError, Result};
use crate::ingestion::connector::TableConnector;
use crate::table::{RawTable, Value};
use std::path::Path;

/// JSON Connector - Wraps provided JSON payloads
pub struct JsonConnector {
    source_id: String,
    source_uri: Option<String>,
    payloads: Vec<serde_json::Value>,
}

impl JsonConnector {
    pub fn new(source_id: String, payloads: Vec<serde_json::Value>) -> Self {
        Self {
            source_id,
            source_uri: None,
            payloads,
        }
    }

    /// Parse JSON text that must be a top-level array of objects.
    pub fn from_text(source_id: String, text: &str) -> Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(text)?;
        match parsed {
            serde_json::Value::Array(payloads) => Ok(Self::new(source_id, payloads)),
            _ => Err(PipelineError::Normalization(
                "JSON input must be an array of records".to_string(),
            )),
        }
    }

    pub fn from_path(source_id: String, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut connector = Self::from_text(source_id, &text)?;
        connector.source_uri = Some(path.display().to_string());
        Ok(connector)
    }

    fn to_cell(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map_or(Value::Null, Value::Real),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            // Nested values are kept as their JSON text
            other => Value::Text(other.to_string()),
        }
    }
}

impl TableConnector for JsonConnector {
    fn read_table(&mut self) -> Result<RawTable> {
        // Columns are added in the order keys are first met across records
        let mut headers: Vec<String> = Vec::new();
        for (idx, payload) in self.payloads.iter().enumerate() {
            let obj = payload.as_object().ok_or_else(|| {
                PipelineError::Normalization(format!("record {} is not a JSON object", idx))
            })?;
            for key in obj.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }

        let rows = self
            .payloads
            .iter()
            .filter_map(|p| p.as_object())
            .map(|obj| {
                headers
                    .iter()
                    .map(|h| obj.get(h).map_or(Value::Null, Self::to_cell))
                    .collect()
            })
            .collect();

        Ok(RawTable::from_rows(headers, rows))
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn source_type(&self) -> &str {
        "json"
    }

    fn source_uri(&self) -> Option<&str> {
        self.source_uri.as_deref()
    }
}
