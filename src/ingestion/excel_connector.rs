//! Excel Connector - Reads the first worksheet of a workbook into a raw table

use crate::error::{PipelineError, Result};
use crate::ingestion::connector::TableConnector;
use crate::table::{RawTable, Value};
use calamine::{open_workbook_auto_from_rs, Data, DataType, Range, Reader};
use chrono::Timelike;
use std::io::Cursor;
use std::path::Path;

/// Largest magnitude at which a whole float still maps to an exact integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Excel Connector - Wraps workbook bytes (.xlsx, .xls, .xlsb, .ods).
pub struct ExcelConnector {
    source_id: String,
    source_uri: Option<String>,
    bytes: Vec<u8>,
}

impl ExcelConnector {
    pub fn new(source_id: String, bytes: Vec<u8>) -> Self {
        Self {
            source_id,
            source_uri: None,
            bytes,
        }
    }

    pub fn from_path(source_id: String, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        Ok(Self {
            source_id,
            source_uri: Some(path.display().to_string()),
            bytes,
        })
    }

    fn first_sheet(&self) -> Result<Range<Data>> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(self.bytes.as_slice()))?;
        workbook
            .worksheet_range_at(0)
            .ok_or_else(|| PipelineError::Normalization("workbook has no worksheets".to_string()))?
            .map_err(PipelineError::from)
    }

    fn to_cell(cell: &Data) -> Value {
        match cell {
            Data::Empty | Data::Error(_) => Value::Null,
            Data::Bool(b) => Value::Boolean(*b),
            Data::Int(i) => Value::Integer(*i),
            // Workbooks store every number as a float; whole ones read back as integers
            Data::Float(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => {
                Value::Integer(*f as i64)
            }
            Data::Float(f) => Value::Real(*f),
            Data::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Value::Null
                } else {
                    Value::Text(trimmed.to_string())
                }
            }
            Data::DateTime(dt) => match cell.as_datetime() {
                Some(ts) if ts.num_seconds_from_midnight() == 0 => {
                    Value::Text(ts.format("%Y-%m-%d").to_string())
                }
                Some(ts) => Value::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
                None => Value::Real(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        }
    }
}

impl TableConnector for ExcelConnector {
    fn read_table(&mut self) -> Result<RawTable> {
        let range = self.first_sheet()?;
        let mut rows = range.rows();

        // First row is the header, kept verbatim like the CSV reader does
        let headers = match rows.next() {
            Some(header) => header.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            None => return Ok(RawTable::from_rows(Vec::new(), Vec::new())),
        };
        let rows = rows
            .map(|row| row.iter().map(Self::to_cell).collect())
            .collect();

        Ok(RawTable::from_rows(headers, rows))
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn source_type(&self) -> &str {
        "excel"
    }

    fn source_uri(&self) -> Option<&str> {
        self.source_uri.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/ad_sales_metrics.xlsx")
    }

    #[test]
    fn test_reads_first_sheet_with_typed_cells() {
        let mut connector = ExcelConnector::from_path("ad_sales".to_string(), fixture()).unwrap();

        let table = connector.read_table().unwrap();

        assert_eq!(
            table.column_names(),
            vec!["Date", "Item ID", "Ad Sales", "Impressions", "Ad Spend", "Clicks", "Units Sold"]
        );
        assert_eq!(table.row_count(), 2);
        assert_eq!(
            table.columns[0].values,
            vec![Value::from("2025-06-01"), Value::from("2025-06-02")]
        );
        assert_eq!(table.columns[2].values, vec![Value::Real(120.5), Value::Integer(80)]);
        assert_eq!(table.columns[4].values, vec![Value::Integer(30), Value::Real(40.25)]);
        // Cell absent from the sheet
        assert_eq!(table.columns[5].values, vec![Value::Integer(25), Value::Null]);
        assert_eq!(connector.source_type(), "excel");
        assert!(connector.source_uri().unwrap().ends_with("ad_sales_metrics.xlsx"));
    }

    #[test]
    fn test_cell_mapping() {
        assert_eq!(ExcelConnector::to_cell(&Data::Empty), Value::Null);
        assert_eq!(ExcelConnector::to_cell(&Data::Bool(true)), Value::Boolean(true));
        assert_eq!(ExcelConnector::to_cell(&Data::Int(7)), Value::Integer(7));
        assert_eq!(ExcelConnector::to_cell(&Data::Float(2.0)), Value::Integer(2));
        assert_eq!(ExcelConnector::to_cell(&Data::Float(2.5)), Value::Real(2.5));
        assert_eq!(ExcelConnector::to_cell(&Data::String("  ".to_string())), Value::Null);
        assert_eq!(ExcelConnector::to_cell(&Data::String(" A1 ".to_string())), Value::from("A1"));
    }

    #[test]
    fn test_rejects_bytes_that_are_not_a_workbook() {
        let mut connector = ExcelConnector::new("t".to_string(), b"item_id,clicks\nA1,3\n".to_vec());
        assert!(connector.read_table().is_err());
    }
}
