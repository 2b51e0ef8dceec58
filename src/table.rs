//! Tabular data shapes shared by every stage of the pipeline.
//!
//! A `RawTable` is what a connector reads from a file, a `NormalizedTable` is
//! what the store persists, and a `QueryResult` is what comes back out.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A single scalar cell. `Null` is the missing-marker; blank text is read
/// as missing too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Missing cells: `Null` or blank text.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Real(_))
    }

    /// Numeric coercion used during normalization. Booleans count as 1/0,
    /// text is parsed after trimming; non-finite parses are rejected.
    pub fn coerce_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => f.is_finite().then_some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        }
    }

    /// Numeric view of a stored value; text is not parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// One column of a table as loaded from a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub values: Vec<Value>,
}

/// An in-memory table exactly as read from a spreadsheet-like source.
/// No invariants: columns may be blank, ragged, or of mixed type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<RawColumn>,
}

impl RawTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.columns.push(RawColumn {
            name: name.into(),
            values,
        });
        self
    }

    /// Build a table from a header row and row-major records. Short records
    /// are padded with `Null`.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut columns: Vec<RawColumn> = headers
            .into_iter()
            .map(|name| RawColumn {
                name,
                values: Vec::with_capacity(rows.len()),
            })
            .collect();

        for row in rows {
            let mut cells = row.into_iter();
            for column in columns.iter_mut() {
                column.values.push(cells.next().unwrap_or(Value::Null));
            }
        }

        Self { columns }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Longest column length.
    pub fn row_count(&self) -> usize {
        self.columns.iter().map(|c| c.values.len()).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, ColumnKind::Text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Value>,
}

/// A cleaned table: no missing cells, unique store-safe column names, one
/// consistent kind per column. Only the normalizer builds these.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub(crate) columns: Vec<NormalizedColumn>,
    pub(crate) row_count: usize,
}

impl NormalizedTable {
    pub fn columns(&self) -> &[NormalizedColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&NormalizedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Row-major view, one borrowed cell per column.
    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.row_count).map(move |i| self.columns.iter().map(|c| &c.values[i]).collect())
    }
}

static NULL: Value = Value::Null;

/// Rows returned by a read statement. Column names are unique and in
/// projection order; each row is aligned to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Duplicate projection names are suffixed (`total`, `total_2`).
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let (columns, _) = unique_names(columns);
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| row.get(idx).unwrap_or(&NULL))
    }

    /// A column is numeric when it has at least one non-null value and every
    /// non-null value is an integer or real.
    pub fn is_numeric_column(&self, idx: usize) -> bool {
        let mut seen = false;
        for value in self.column_values(idx) {
            match value {
                Value::Null => {}
                v if v.is_numeric() => seen = true,
                _ => return false,
            }
        }
        seen
    }

    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&i| self.is_numeric_column(i))
            .collect()
    }

    pub fn non_numeric_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&i| !self.is_numeric_column(i))
            .collect()
    }
}

/// Outcome of a non-read statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub rows_affected: usize,
}

/// Make every name unique by appending `_2`, `_3`, ... to repeats. Returns the
/// new names and the names that collided.
pub fn unique_names(names: Vec<String>) -> (Vec<String>, Vec<String>) {
    let taken: HashSet<String> = names.iter().cloned().collect();
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());
    let mut collisions = Vec::new();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        if used.insert(name.clone()) {
            out.push(name);
            continue;
        }
        let mut n = 2;
        let candidate = loop {
            let candidate = format!("{}_{}", name, n);
            if !taken.contains(&candidate) && !used.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        used.insert(candidate.clone());
        collisions.push(name);
        out.push(candidate);
    }

    (out, collisions)
}

/// Quote an identifier for SQLite.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
