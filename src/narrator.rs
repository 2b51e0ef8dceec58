//! Insight Narrator - business commentary on a query result.
//!
//! The result is summarised with polars (shape, head, describe-style
//! statistics) and the summary is handed to the text backend together with
//! the question. Narration never aborts a request: failures come back as a
//! readable placeholder string.

use crate::error::{PipelineError, Result};
use crate::llm::TextGenerator;
use crate::table::{QueryResult, Value};
use polars::prelude::*;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

const HEAD_ROWS: usize = 5;

pub struct InsightNarrator {
    generator: Arc<dyn TextGenerator>,
}

impl InsightNarrator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn narrate(&self, question: &str, result: &QueryResult) -> String {
        match self.try_narrate(question, result).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Narration failed: {}", e);
                format!("Error generating business insights: {}", e)
            }
        }
    }

    pub async fn try_narrate(&self, question: &str, result: &QueryResult) -> Result<String> {
        let summary = summarize(result)?;
        let prompt = build_prompt(question, &summary);
        debug!("Narration prompt: {} chars", prompt.len());

        self.generator
            .generate(&prompt)
            .await
            .map_err(|e| PipelineError::Narration(e.to_string()))
    }
}

fn build_prompt(question: &str, summary: &str) -> String {
    format!(
        r#"As an e-commerce business analyst, provide insights based on the following:

Question: {question}

Data Summary:
{summary}

Please provide:
1. Key findings from the data
2. Business implications
3. Actionable recommendations
4. Notable trends or patterns
5. Potential risks or opportunities

Keep the response concise but insightful, focused on business value."#,
        question = question.trim(),
        summary = summary,
    )
}

/// Polars frame mirroring the result: numeric columns as f64, others as text.
pub fn to_frame(result: &QueryResult) -> Result<DataFrame> {
    let numeric = result.numeric_columns();
    let series: Vec<Series> = result
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if numeric.contains(&idx) {
                let values: Vec<Option<f64>> = result.column_values(idx).map(Value::as_f64).collect();
                Series::new(name, values)
            } else {
                let values: Vec<Option<String>> = result
                    .column_values(idx)
                    .map(|v| (!v.is_null()).then(|| v.to_string()))
                    .collect();
                Series::new(name, values)
            }
        })
        .collect();

    Ok(DataFrame::new(series)?)
}

/// Shape, column list, first rows, and statistics for numeric columns.
pub fn summarize(result: &QueryResult) -> Result<String> {
    let df = to_frame(result)?;
    let mut out = String::new();

    let _ = writeln!(out, "Data shape: {:?}", df.shape());
    let _ = writeln!(out, "Columns: {}", result.columns.join(", "));
    let _ = writeln!(out);
    let _ = writeln!(out, "Sample data:");
    let _ = writeln!(out, "{}", df.head(Some(HEAD_ROWS)));

    let numeric = result.numeric_columns();
    if !result.is_empty() && !numeric.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Statistical summary:");
        for idx in numeric {
            let name = &result.columns[idx];
            let stats = describe(df.column(name)?)?;
            let _ = writeln!(out, "{}: {}", name, stats);
        }
    }

    Ok(out)
}

fn describe(series: &Series) -> Result<String> {
    let ca = series.f64()?;
    let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string());

    Ok(format!(
        "count={} mean={} std={} min={} 25%={} 50%={} 75%={} max={}",
        ca.len() - ca.null_count(),
        fmt(ca.mean()),
        fmt(ca.std(1)),
        fmt(ca.min()),
        fmt(ca.quantile(0.25, QuantileInterpolOptions::Linear)?),
        fmt(ca.median()),
        fmt(ca.quantile(0.75, QuantileInterpolOptions::Linear)?),
        fmt(ca.max()),
    ))
}
