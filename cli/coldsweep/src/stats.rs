use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution, OrderStatistics};
use tokio::sync::Mutex;

use crate::types::{InvocationOutcome, OutcomeTally, RunResult, StartKind};

/// Collects outcomes from concurrent workers.
///
/// Workers share it through an `Arc`; `finalize` takes it by value, so the
/// statistics can only be read once every worker has dropped its handle.
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    inner: Mutex<RunStatistics>,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: &InvocationOutcome) {
        let mut stats = self.inner.lock().await;
        match outcome {
            InvocationOutcome::Sample { latency_ms, kind } => {
                stats.push(*latency_ms);
                match kind {
                    StartKind::Cold => stats.tally.cold += 1,
                    StartKind::Restore => stats.tally.restore += 1,
                }
            }
            InvocationOutcome::NoSample => stats.tally.no_sample += 1,
            InvocationOutcome::Throttled => stats.tally.throttled += 1,
            InvocationOutcome::TimedOut => stats.tally.timed_out += 1,
            InvocationOutcome::Failed(_) => stats.tally.failed += 1,
        }
    }

    /// Freezes the collected samples. Sorting happens here, once.
    pub fn finalize(self) -> RunStatistics {
        let mut stats = self.inner.into_inner();
        stats.samples.sort_by(f64::total_cmp);
        stats
    }
}

/// Frozen statistics of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    count: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
    samples: Vec<f64>,
    tally: OutcomeTally,
}

/// Spread of the samples beyond the four headline numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpreadStats {
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
}

impl RunStatistics {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.samples.push(value);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Samples in ascending order.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn tally(&self) -> &OutcomeTally {
        &self.tally
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn median(&self) -> Option<f64> {
        let n = self.samples.len();
        if n == 0 {
            return None;
        }
        let mid = n / 2;
        if n % 2 == 0 {
            Some((self.samples[mid - 1] + self.samples[mid]) / 2.0)
        } else {
            Some(self.samples[mid])
        }
    }

    pub fn result(&self) -> RunResult {
        RunResult {
            min: self.min,
            max: self.max,
            average: self.average(),
            median: self.median(),
        }
    }

    pub fn spread(&self) -> Option<SpreadStats> {
        match self.samples.as_slice() {
            [] => None,
            [only] => Some(SpreadStats {
                p95: *only,
                p99: *only,
                std_dev: 0.0,
            }),
            samples => {
                let mut data = Data::new(samples.to_vec());
                Some(SpreadStats {
                    p95: data.percentile(95),
                    p99: data.percentile(99),
                    std_dev: data.std_dev().unwrap_or(f64::NAN),
                })
            }
        }
    }
}
