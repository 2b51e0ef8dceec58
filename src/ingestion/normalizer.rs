//! Tabular Normalizer - turns a loosely-typed `RawTable` into a
//! `NormalizedTable` with stable column names and one type per column.

use crate::error::{PipelineError, Result};
use crate::table::{unique_names, ColumnKind, NormalizedColumn, NormalizedTable, RawTable, Value};
use regex::Regex;
use tracing::{debug, warn};

/// Fill value for missing cells in textual columns.
pub const TEXT_FILL: &str = "Unknown";

const SEPARATOR_PATTERN: &str = r"[\s().\-]";

fn separator_regex() -> Result<Regex> {
    Regex::new(SEPARATOR_PATTERN)
        .map_err(|e| PipelineError::Normalization(format!("Failed to create regex: {}", e)))
}

fn rename(raw: &str, separators: &Regex) -> String {
    let lowered = raw.trim().to_lowercase();
    separators.replace_all(&lowered, "_").into_owned()
}

/// Canonical column identifier: trimmed, lower-cased, with whitespace and
/// `( ) - .` replaced by underscores.
pub fn normalize_column_name(raw: &str) -> Result<String> {
    Ok(rename(raw, &separator_regex()?))
}

pub fn normalize(raw: &RawTable) -> Result<NormalizedTable> {
    if raw.columns.is_empty() {
        return Err(PipelineError::Normalization("table has no columns".to_string()));
    }

    let height = raw.row_count();
    if let Some(ragged) = raw.columns.iter().find(|c| c.values.len() != height) {
        return Err(PipelineError::Normalization(format!(
            "column '{}' has {} values, expected {}",
            ragged.name,
            ragged.values.len(),
            height
        )));
    }

    // 1. Drop fully-empty rows, then fully-empty columns
    let kept_rows: Vec<usize> = (0..height)
        .filter(|&i| raw.columns.iter().any(|c| !c.values[i].is_missing()))
        .collect();
    let kept_columns: Vec<_> = raw
        .columns
        .iter()
        .filter(|c| kept_rows.iter().any(|&i| !c.values[i].is_missing()))
        .collect();

    if kept_columns.is_empty() {
        return Err(PipelineError::Normalization(
            "table has no non-empty columns".to_string(),
        ));
    }
    debug!(
        "Dropped {} empty rows and {} empty columns",
        height - kept_rows.len(),
        raw.columns.len() - kept_columns.len()
    );

    // 2. Rename, disambiguating collisions
    let separators = separator_regex()?;
    let renamed: Vec<String> = kept_columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let name = rename(&c.name, &separators);
            if name.is_empty() {
                format!("column_{}", i + 1)
            } else {
                name
            }
        })
        .collect();
    let (names, collisions) = unique_names(renamed);
    if !collisions.is_empty() {
        warn!("Column names collided after normalization and were suffixed: {:?}", collisions);
    }

    // 3 + 4. Coerce and fill
    let columns = kept_columns
        .into_iter()
        .zip(names)
        .map(|(column, name)| {
            let cells: Vec<&Value> = kept_rows.iter().map(|&i| &column.values[i]).collect();
            coerce_column(name, &cells)
        })
        .collect();

    Ok(NormalizedTable {
        columns,
        row_count: kept_rows.len(),
    })
}

enum Parsed {
    Int(i64),
    Float(f64),
    Missing,
}

fn parse_cell(value: &Value) -> Parsed {
    match value {
        Value::Null => Parsed::Missing,
        Value::Boolean(b) => Parsed::Int(i64::from(*b)),
        Value::Integer(i) => Parsed::Int(*i),
        Value::Real(_) => value.coerce_f64().map_or(Parsed::Missing, Parsed::Float),
        Value::Text(s) => match s.trim().parse::<i64>() {
            Ok(i) => Parsed::Int(i),
            Err(_) => value.coerce_f64().map_or(Parsed::Missing, Parsed::Float),
        },
    }
}

fn coerce_column(name: String, cells: &[&Value]) -> NormalizedColumn {
    let parsed: Vec<Parsed> = cells.iter().map(|v| parse_cell(v)).collect();
    let any_numeric = parsed.iter().any(|p| !matches!(p, Parsed::Missing));

    if !any_numeric {
        let values = cells
            .iter()
            .map(|v| match v {
                v if v.is_missing() => Value::Text(TEXT_FILL.to_string()),
                other => Value::Text(other.to_string()),
            })
            .collect();
        return NormalizedColumn {
            name,
            kind: ColumnKind::Text,
            values,
        };
    }

    let discarded = cells
        .iter()
        .zip(&parsed)
        .filter(|(v, p)| !v.is_missing() && matches!(p, Parsed::Missing))
        .count();
    if discarded > 0 {
        debug!("Column '{}': {} non-numeric values coerced to 0", name, discarded);
    }

    let has_float = parsed.iter().any(|p| matches!(p, Parsed::Float(_)));
    if has_float {
        let values = parsed
            .into_iter()
            .map(|p| match p {
                Parsed::Int(i) => Value::Real(i as f64),
                Parsed::Float(f) => Value::Real(f),
                Parsed::Missing => Value::Real(0.0),
            })
            .collect();
        NormalizedColumn {
            name,
            kind: ColumnKind::Real,
            values,
        }
    } else {
        let values = parsed
            .into_iter()
            .map(|p| match p {
                Parsed::Int(i) => Value::Integer(i),
                _ => Value::Integer(0),
            })
            .collect();
        NormalizedColumn {
            name,
            kind: ColumnKind::Integer,
            values,
        }
    }
}
