//! Ordered keyword rules mapping a question to a chart family.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartFamily {
    Bar,
    Line,
    Pie,
    Scatter,
    Histogram,
}

impl ChartFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartFamily::Bar => "bar",
            ChartFamily::Line => "line",
            ChartFamily::Pie => "pie",
            ChartFamily::Scatter => "scatter",
            ChartFamily::Histogram => "histogram",
        }
    }
}

impl fmt::Display for ChartFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matches when the lower-cased question contains any keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRule {
    pub family: ChartFamily,
    pub keywords: Vec<String>,
}

impl ChartRule {
    pub fn new(family: ChartFamily, keywords: &[&str]) -> Self {
        Self {
            family,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn matches(&self, question_lower: &str) -> bool {
        self.keywords.iter().any(|k| question_lower.contains(k.as_str()))
    }
}

/// Rules evaluated in order; the first match wins, otherwise `fallback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRules {
    rules: Vec<ChartRule>,
    fallback: ChartFamily,
}

impl ChartRules {
    pub fn new(rules: Vec<ChartRule>, fallback: ChartFamily) -> Self {
        Self { rules, fallback }
    }

    pub fn rules(&self) -> &[ChartRule] {
        &self.rules
    }

    pub fn select(&self, question: &str) -> ChartFamily {
        let lower = question.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lower))
            .map(|rule| rule.family)
            .unwrap_or(self.fallback)
    }
}

impl Default for ChartRules {
    fn default() -> Self {
        Self::new(
            vec![
                ChartRule::new(ChartFamily::Histogram, &["distribution", "frequency", "histogram"]),
                ChartRule::new(
                    ChartFamily::Line,
                    &["trend", "over time", "timeline", "monthly", "daily"],
                ),
                ChartRule::new(ChartFamily::Pie, &["share", "proportion", "percentage", "breakdown"]),
                ChartRule::new(ChartFamily::Scatter, &["correlation", "relationship", "vs", "versus"]),
            ],
            ChartFamily::Bar,
        )
    }
}
