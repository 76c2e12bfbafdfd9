//! JSON report written with `--output`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::cli::LogSource;
use crate::stats::{RunStatistics, SpreadStats};
use crate::types::{OutcomeTally, RunResult};

/// Settings a run was made with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub tag_key: String,
    pub language: Option<String>,
    pub alias: Option<String>,
    pub concurrency: Option<usize>,
    pub log_source: LogSource,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub config: ReportConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: RunResult,
    pub spread: Option<SpreadStats>,
    pub outcomes: OutcomeTally,
    /// Start-up durations in ms, ascending.
    pub samples: Vec<f64>,
}

impl RunReport {
    pub fn new(
        config: ReportConfig,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        stats: &RunStatistics,
    ) -> Self {
        Self {
            config,
            started_at,
            finished_at,
            summary: stats.result(),
            spread: stats.spread(),
            outcomes: *stats.tally(),
            samples: stats.samples().to_vec(),
        }
    }
}

pub fn save_report(report: &RunReport, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    let mut file = File::create(output_path)
        .with_context(|| format!("Failed to create report file: {}", output_path.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write report file: {}", output_path.display()))?;

    tracing::info!(path = %output_path.display(), "Report saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsAggregator;
    use crate::types::{InvocationOutcome, StartKind};
    use tempfile::tempdir;

    fn config() -> ReportConfig {
        ReportConfig {
            tag_key: "language".to_string(),
            language: Some("rust".to_string()),
            alias: None,
            concurrency: Some(4),
            log_source: LogSource::Inline,
            region: Some("us-east-1".to_string()),
        }
    }

    async fn stats(values: &[f64]) -> RunStatistics {
        let aggregator = StatisticsAggregator::new();
        for v in values {
            aggregator
                .record(&InvocationOutcome::Sample {
                    latency_ms: *v,
                    kind: StartKind::Cold,
                })
                .await;
        }
        aggregator.record(&InvocationOutcome::NoSample).await;
        aggregator.finalize()
    }

    #[tokio::test]
    async fn test_save_report_happy_path() {
        let temp_dir = tempdir().unwrap();
        let output_path = temp_dir.path().join("reports").join("run.json");
        let now = Utc::now();
        let report = RunReport::new(config(), now, now, &stats(&[300.0, 100.0, 200.0]).await);

        save_report(&report, &output_path).unwrap();

        assert!(output_path.exists());
        let content = fs::read_to_string(&output_path).unwrap();
        let read_back: RunReport = serde_json::from_str(&content).unwrap();
        assert_eq!(read_back, report);
        assert_eq!(read_back.samples, vec![100.0, 200.0, 300.0]);
        assert_eq!(read_back.summary.median, Some(200.0));
        assert_eq!(read_back.outcomes.no_sample, 1);
        assert!(content.contains("\"log_source\": \"inline\""));
    }

    #[tokio::test]
    async fn test_empty_run_serializes_nulls() {
        let temp_dir = tempdir().unwrap();
        let output_path = temp_dir.path().join("empty.json");
        let now = Utc::now();
        let report = RunReport::new(config(), now, now, &stats(&[]).await);

        save_report(&report, &output_path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output_path).unwrap()).unwrap();
        assert!(value["summary"]["average"].is_null());
        assert!(value["spread"].is_null());
        assert_eq!(value["samples"].as_array().map(Vec::len), Some(0));
    }
}
