//! Report Output
//!
//! Renders the timings of a comparison run as aligned text or JSON.

use crate::harness::StrategyOutcome;
use crate::strategy::TimingResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output format for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Human,
    /// JSON document
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

/// A strategy that did not produce a timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyFailure {
    /// Strategy name
    pub strategy: String,
    /// Error message
    pub error: String,
}

/// Everything a comparison run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchReport {
    /// When the report was assembled
    pub timestamp: DateTime<Utc>,
    /// Tasks per batch
    pub task_count: usize,
    /// Wait per task, in seconds
    pub task_duration_secs: f64,
    /// Timings, in run order
    pub results: Vec<TimingResult>,
    /// Strategies that failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<StrategyFailure>,
}

impl BenchReport {
    /// Collect the outcomes of a comparison run
    pub fn from_outcomes(
        task_count: usize,
        task_duration_secs: f64,
        outcomes: &[StrategyOutcome],
    ) -> Self {
        let mut results = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match &outcome.result {
                Ok(timing) => results.push(timing.clone()),
                Err(e) => failures.push(StrategyFailure {
                    strategy: outcome.strategy.name().to_string(),
                    error: e.to_string(),
                }),
            }
        }

        Self {
            timestamp: Utc::now(),
            task_count,
            task_duration_secs,
            results,
            failures,
        }
    }

    /// Whether any strategy failed
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Render in `format`
    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Human => Ok(format_human_output(self)),
            OutputFormat::Json => generate_json_report(self),
        }
    }
}

/// One report line: the strategy name padded to 18 columns, then seconds
pub fn format_result_line(result: &TimingResult) -> String {
    format!("{:<18} {:.3} s", result.strategy, result.elapsed_seconds)
}

/// Aligned text, one line per strategy
pub fn format_human_output(report: &BenchReport) -> String {
    let mut output = String::new();
    for result in &report.results {
        output.push_str(&format_result_line(result));
        output.push('\n');
    }
    for failure in &report.failures {
        output.push_str(&format!("{:<18} failed: {}\n", failure.strategy, failure.error));
    }
    output
}

/// Pretty-printed JSON document
pub fn generate_json_report(report: &BenchReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
