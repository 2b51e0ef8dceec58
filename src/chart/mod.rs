//! Chart Selector - picks a chart family from the question and binds result
//! columns to it by type.
//!
//! Family choice comes from [`ChartRules`]; column binding ignores the
//! question entirely. When the chosen family's column preconditions are not
//! met there is no chart, and no other family is tried.

pub mod rules;
pub mod svg;

pub use rules::{ChartFamily, ChartRule, ChartRules};

use crate::table::{QueryResult, Value};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

pub const BAR_ROW_CAP: usize = 20;
pub const PIE_GROUP_CAP: usize = 10;
pub const LINE_ROW_CAP: usize = 50;
pub const SCATTER_ROW_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartData {
    /// Paired points for bar, line and scatter charts.
    Xy { x: Vec<Value>, y: Vec<Option<f64>> },
    /// Labelled slices for pie charts, largest first.
    Slices { labels: Vec<String>, values: Vec<f64> },
    /// Raw observations for a histogram.
    Distribution { values: Vec<f64> },
}

impl ChartData {
    pub fn len(&self) -> usize {
        match self {
            ChartData::Xy { x, .. } => x.len(),
            ChartData::Slices { labels, .. } => labels.len(),
            ChartData::Distribution { values } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A renderable figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub family: ChartFamily,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub data: ChartData,
}

#[derive(Debug, Clone, Default)]
pub struct ChartSelector {
    rules: ChartRules,
}

impl ChartSelector {
    pub fn new(rules: ChartRules) -> Self {
        Self { rules }
    }

    pub fn select_family(&self, question: &str) -> ChartFamily {
        self.rules.select(question)
    }

    pub fn select_and_build(&self, question: &str, result: &QueryResult) -> Option<Chart> {
        if result.is_empty() || result.column_count() == 0 {
            debug!("No rows to chart");
            return None;
        }

        let family = self.select_family(question);
        let numeric = result.numeric_columns();
        let text = result.non_numeric_columns();

        let chart = match family {
            ChartFamily::Bar => build_bar(result, &numeric, &text),
            ChartFamily::Pie => build_pie(result, &numeric, &text),
            ChartFamily::Line => build_line(result, &numeric),
            ChartFamily::Scatter => build_scatter(result, &numeric),
            ChartFamily::Histogram => build_histogram(result, &numeric),
        };

        match &chart {
            Some(c) => info!("Built {} chart with {} points", family, c.data.len()),
            None => info!("Selected {} chart but the result shape does not fit it", family),
        }
        chart
    }
}

fn xy(x: usize, y: usize, rows: &[&Vec<Value>]) -> ChartData {
    ChartData::Xy {
        x: rows
            .iter()
            .map(|row| row.get(x).cloned().unwrap_or(Value::Null))
            .collect(),
        y: rows
            .iter()
            .map(|row| row.get(y).and_then(Value::as_f64))
            .collect(),
    }
}

fn build_bar(result: &QueryResult, numeric: &[usize], text: &[usize]) -> Option<Chart> {
    let y = *numeric.first()?;
    let x = text
        .first()
        .or_else(|| numeric.get(1))
        .copied()
        .unwrap_or(0);

    let rows: Vec<&Vec<Value>> = result.rows.iter().take(BAR_ROW_CAP).collect();
    let (x_name, y_name) = (&result.columns[x], &result.columns[y]);

    Some(Chart {
        family: ChartFamily::Bar,
        title: format!("{} by {}", y_name, x_name),
        x_label: x_name.clone(),
        y_label: y_name.clone(),
        data: xy(x, y, &rows),
    })
}

fn build_pie(result: &QueryResult, numeric: &[usize], text: &[usize]) -> Option<Chart> {
    let value_idx = *numeric.first()?;
    let label_idx = *text.first()?;

    let mut groups: Vec<(String, f64)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in &result.rows {
        let label = row.get(label_idx).map(Value::to_string).unwrap_or_default();
        let value = row.get(value_idx).and_then(Value::as_f64).unwrap_or(0.0);
        match positions.get(&label) {
            Some(&pos) => groups[pos].1 += value,
            None => {
                positions.insert(label.clone(), groups.len());
                groups.push((label, value));
            }
        }
    }

    // Stable: equal sums keep first-seen order
    groups.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    groups.truncate(PIE_GROUP_CAP);

    let (label_name, value_name) = (&result.columns[label_idx], &result.columns[value_idx]);
    let (labels, values) = groups.into_iter().unzip();

    Some(Chart {
        family: ChartFamily::Pie,
        title: format!("Distribution of {} by {}", value_name, label_name),
        x_label: label_name.clone(),
        y_label: value_name.clone(),
        data: ChartData::Slices { labels, values },
    })
}

fn build_line(result: &QueryResult, numeric: &[usize]) -> Option<Chart> {
    let (x, y) = match numeric {
        [x, y, ..] => (*x, *y),
        _ => return None,
    };

    let mut rows: Vec<&Vec<Value>> = result.rows.iter().collect();
    rows.sort_by(|a, b| {
        match (a.get(x).and_then(Value::as_f64), b.get(x).and_then(Value::as_f64)) {
            (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
    rows.truncate(LINE_ROW_CAP);

    let y_name = &result.columns[y];
    Some(Chart {
        family: ChartFamily::Line,
        title: format!("{} Trend", y_name),
        x_label: result.columns[x].clone(),
        y_label: y_name.clone(),
        data: xy(x, y, &rows),
    })
}

fn build_scatter(result: &QueryResult, numeric: &[usize]) -> Option<Chart> {
    let (x, y) = match numeric {
        [x, y, ..] => (*x, *y),
        _ => return None,
    };

    let rows: Vec<&Vec<Value>> = result.rows.iter().take(SCATTER_ROW_CAP).collect();
    let (x_name, y_name) = (&result.columns[x], &result.columns[y]);

    Some(Chart {
        family: ChartFamily::Scatter,
        title: format!("{} vs {}", y_name, x_name),
        x_label: x_name.clone(),
        y_label: y_name.clone(),
        data: xy(x, y, &rows),
    })
}

fn build_histogram(result: &QueryResult, numeric: &[usize]) -> Option<Chart> {
    let idx = *numeric.first()?;
    let values: Vec<f64> = result.column_values(idx).filter_map(Value::as_f64).collect();
    let name = &result.columns[idx];

    Some(Chart {
        family: ChartFamily::Histogram,
        title: format!("Distribution of {}", name),
        x_label: name.clone(),
        y_label: "count".to_string(),
        data: ChartData::Distribution { values },
    })
}
