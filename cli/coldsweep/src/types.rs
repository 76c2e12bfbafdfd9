use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::BenchError;

/// A deployed function found during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub arn: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arn: arn.into(),
            tags: HashMap::new(),
            runtime: None,
        }
    }
}

/// Function-level tag that a descriptor must carry to be benchmarked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        tags.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

/// One synchronous invocation of a target function.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub target: FunctionDescriptor,
    pub alias: Option<String>,
    pub payload: Option<Vec<u8>>,
    /// Ask the callee to return the tail of its execution log.
    pub log_tail: bool,
}

/// What the invocation service returned for a single request.
#[derive(Debug, Clone, Default)]
pub struct InvocationResponse {
    pub status_code: i32,
    pub function_error: Option<String>,
    pub payload: Vec<u8>,
    /// Base64-encoded log tail, present when it was requested.
    pub log_tail: Option<String>,
}

/// One page of the paginated function listing.
#[derive(Debug, Clone, Default)]
pub struct FunctionPage {
    pub functions: Vec<FunctionDescriptor>,
    pub next_token: Option<String>,
}

/// Which marker produced a latency sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartKind {
    /// `Init Duration`: full runtime initialization.
    Cold,
    /// `Restore Duration`: resumed from an execution snapshot.
    Restore,
}

impl StartKind {
    pub fn marker(&self) -> &'static str {
        match self {
            StartKind::Cold => "Init Duration",
            StartKind::Restore => "Restore Duration",
        }
    }
}

/// Result of dispatching one descriptor.
#[derive(Debug)]
pub enum InvocationOutcome {
    Sample { latency_ms: f64, kind: StartKind },
    /// The function ran but reused a warm environment.
    NoSample,
    /// The invocation service rejected the call for exceeding a limit.
    Throttled,
    /// The log store never showed a marker within the poll bound.
    TimedOut,
    Failed(BenchError),
}

impl InvocationOutcome {
    pub fn sample(&self) -> Option<f64> {
        match self {
            InvocationOutcome::Sample { latency_ms, .. } => Some(*latency_ms),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InvocationOutcome::Sample {
                kind: StartKind::Cold,
                ..
            } => "cold",
            InvocationOutcome::Sample {
                kind: StartKind::Restore,
                ..
            } => "restore",
            InvocationOutcome::NoSample => "warm",
            InvocationOutcome::Throttled => "throttled",
            InvocationOutcome::TimedOut => "timed_out",
            InvocationOutcome::Failed(_) => "failed",
        }
    }
}

/// Counts of every outcome kind seen during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub cold: usize,
    pub restore: usize,
    pub no_sample: usize,
    pub throttled: usize,
    pub timed_out: usize,
    pub failed: usize,
}

impl OutcomeTally {
    pub fn total(&self) -> usize {
        self.cold + self.restore + self.no_sample + self.throttled + self.timed_out + self.failed
    }
}

/// Summary statistics over the collected samples. `None` means undefined,
/// which happens exactly when no sample was collected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average: Option<f64>,
    pub median: Option<f64>,
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: Option<f64>| v.map_or_else(|| "NaN".to_string(), |v| format!("{:.6}", v));
        write!(
            f,
            "Min: {}, Max: {}, Median: {}, Average: {}",
            show(self.min),
            show(self.max),
            show(self.median),
            show(self.average)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_filter_requires_exact_value() {
        let filter = TagFilter::new("language", "rust");
        let mut tags = HashMap::new();
        assert!(!filter.matches(&tags));

        tags.insert("language".to_string(), "go".to_string());
        assert!(!filter.matches(&tags));

        tags.insert("language".to_string(), "rust".to_string());
        assert!(filter.matches(&tags));
    }

    #[test]
    fn test_run_result_display() {
        let result = RunResult {
            min: Some(10.0),
            max: Some(30.0),
            average: Some(20.0),
            median: Some(20.0),
        };
        assert_eq!(
            result.to_string(),
            "Min: 10.000000, Max: 30.000000, Median: 20.000000, Average: 20.000000"
        );
    }

    #[test]
    fn test_run_result_display_undefined() {
        let result = RunResult {
            min: None,
            max: None,
            average: None,
            median: None,
        };
        assert_eq!(result.to_string(), "Min: NaN, Max: NaN, Median: NaN, Average: NaN");
    }

    #[test]
    fn test_outcome_labels() {
        let cold = InvocationOutcome::Sample {
            latency_ms: 1.0,
            kind: StartKind::Cold,
        };
        assert_eq!(cold.label(), "cold");
        assert_eq!(cold.sample(), Some(1.0));
        assert_eq!(InvocationOutcome::NoSample.sample(), None);
        assert_eq!(InvocationOutcome::Throttled.label(), "throttled");
    }
}
