//! Query Synthesizer - natural-language question to a single SQL statement.

use crate::error::{PipelineError, Result};
use crate::llm::TextGenerator;
use crate::store::SchemaDescriptor;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Derived e-commerce metrics the backend should compute rather than look up.
pub const METRIC_DEFINITIONS: &[(&str, &str)] = &[
    ("RoAS (Return on Ad Spend)", "ad_sales / ad_spend"),
    ("CPC (Cost Per Click)", "ad_spend / clicks"),
    ("CTR (Click Through Rate)", "clicks / impressions"),
];

const DOMAIN_NOTES: &[&str] = &[
    "item_id is the product identifier shared by all tables; join on it to combine tables",
    "ad_sales, ad_spend and total_sales are monetary amounts in currency units",
    "eligibility column: 1 = eligible for advertising, 0 = not eligible; message holds the reason",
    "Guard divisions against zero denominators with NULLIF",
];

/// The synthesizer's output: one SQL statement with code-fence artifacts
/// removed. Untrusted; it is executed without parse-level validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery(String);

impl GeneratedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for GeneratedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remove a leading code fence with its info string (```` ```sql ````,
/// ```` ```sqlite ````, ...) and a trailing fence.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = match trimmed.strip_prefix("```") {
        Some(rest) => match rest.split_once('\n') {
            Some((info, body)) if !info.trim().contains(' ') => body,
            // Single-line fence: only a bare sql tag can be told apart from the query
            _ => rest
                .strip_prefix("sql")
                .or_else(|| rest.strip_prefix("SQL"))
                .unwrap_or(rest),
        },
        None => trimmed,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

pub struct QuerySynthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl QuerySynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Prompt embedding the live schema, metric formulas, the question, and
    /// the single-statement output contract.
    pub fn build_prompt(&self, question: &str, schema: &SchemaDescriptor) -> String {
        let metrics = METRIC_DEFINITIONS
            .iter()
            .map(|(name, formula)| format!("- {} = {}", name, formula))
            .collect::<Vec<_>>()
            .join("\n");
        let notes = DOMAIN_NOTES
            .iter()
            .map(|n| format!("- {}", n))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are an expert SQL query generator for e-commerce data analysis.

{schema}
Derived metrics:
{metrics}

Notes:
{notes}

Question: {question}

Rules:
1. Use only the tables and columns listed in the schema
2. Write a single SQLite statement
3. Use JOINs on item_id when data from several tables is needed
4. Add WHERE, GROUP BY and ORDER BY clauses as the question requires
5. Compute derived metrics with the formulas above
6. Return only the SQL statement: no explanation, no markdown

SQL Query:"#,
            schema = schema,
            metrics = metrics,
            notes = notes,
            question = question.trim(),
        )
    }

    pub async fn synthesize(&self, question: &str, schema: &SchemaDescriptor) -> Result<GeneratedQuery> {
        let prompt = self.build_prompt(question, schema);
        debug!("SQL synthesis prompt: {} chars", prompt.len());

        let completion = self
            .generator
            .generate(&prompt)
            .await
            .map_err(|e| PipelineError::Synthesis(format!("Failed to generate SQL query: {}", e)))?;

        let sql = strip_code_fences(&completion);
        if sql.is_empty() {
            return Err(PipelineError::Synthesis(
                "Failed to generate SQL query: backend returned no SQL".to_string(),
            ));
        }

        info!("Generated SQL: {}", sql);
        Ok(GeneratedQuery(sql.to_string()))
    }
}
