//! Table Connector Trait - Abstract interface for tabular sources

use crate::error::Result;
use crate::table::RawTable;

/// A source that yields one raw table.
///
/// Implementations:
/// - CsvConnector: comma-separated text with a header row
/// - JsonConnector: an array of flat JSON objects
/// - ExcelConnector: the first worksheet of a workbook
pub trait TableConnector: Send {
    /// Read the whole source into a raw table
    fn read_table(&mut self) -> Result<RawTable>;

    /// Get source ID (unique identifier)
    fn source_id(&self) -> &str;

    /// Get source type (e.g., "csv", "json", "excel")
    fn source_type(&self) -> &str;

    /// Get source URI (file path the data came from, if any)
    fn source_uri(&self) -> Option<&str>;
}
