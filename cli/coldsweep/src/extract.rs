//! Startup latency extraction from execution logs.
//!
//! Both strategies look for the same two markers that the platform writes
//! into the `REPORT` line of an invocation: `Init Duration` for a cold start
//! and `Restore Duration` for a snapshot restore. A log without either marker
//! belongs to a warm start.

use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;
use crate::service::{LogStore, LogStoreError};
use crate::types::{FunctionDescriptor, InvocationOutcome, InvocationResponse, StartKind};

pub const DEFAULT_LOG_GROUP_PREFIX: &str = "/aws/lambda/";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_READ_LIMIT: i32 = 50;

/// Finds duration markers in log text.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    pattern: Regex,
}

impl Default for MarkerScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerScanner {
    pub fn new() -> Self {
        // Loose value group: a garbled number is an error, not a warm start.
        let pattern = Regex::new(r"(Init|Restore) Duration:\s*(\S*?)\s*ms")
            .expect("marker pattern is a valid regex");
        Self { pattern }
    }

    /// Returns the first marker in text order, if any.
    pub fn scan(&self, text: &str) -> Result<Option<(StartKind, f64)>, ExtractError> {
        let Some(captures) = self.pattern.captures(text) else {
            return Ok(None);
        };
        let kind = match &captures[1] {
            "Init" => StartKind::Cold,
            _ => StartKind::Restore,
        };
        let raw = &captures[2];
        let value = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ExtractError::MarkerParse {
                marker: kind.marker(),
                value: raw.to_string(),
            })?;
        Ok(Some((kind, value)))
    }
}

/// Turns an invocation response into an outcome.
#[async_trait]
pub trait DurationExtractor: Send + Sync {
    /// Whether invocations must ask for the inline log tail.
    fn wants_log_tail(&self) -> bool;

    /// Yields `Sample`, `NoSample` or `TimedOut`; anything else is an error.
    async fn extract(
        &self,
        target: &FunctionDescriptor,
        response: &InvocationResponse,
        cancel: &CancellationToken,
    ) -> Result<InvocationOutcome, ExtractError>;
}

fn outcome_from(found: Option<(StartKind, f64)>) -> InvocationOutcome {
    match found {
        Some((kind, latency_ms)) => InvocationOutcome::Sample { latency_ms, kind },
        None => InvocationOutcome::NoSample,
    }
}

/// Reads the base64 log tail returned with the invocation itself.
#[derive(Debug, Clone, Default)]
pub struct InlineExtractor {
    scanner: MarkerScanner,
}

impl InlineExtractor {
    pub fn new(scanner: MarkerScanner) -> Self {
        Self { scanner }
    }

    pub fn extract_from_tail(&self, encoded: &str) -> Result<InvocationOutcome, ExtractError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ExtractError::Decode(e.to_string()))?;
        let logs = String::from_utf8_lossy(&bytes);
        Ok(outcome_from(self.scanner.scan(&logs)?))
    }
}

#[async_trait]
impl DurationExtractor for InlineExtractor {
    fn wants_log_tail(&self) -> bool {
        true
    }

    async fn extract(
        &self,
        target: &FunctionDescriptor,
        response: &InvocationResponse,
        _cancel: &CancellationToken,
    ) -> Result<InvocationOutcome, ExtractError> {
        let Some(encoded) = response.log_tail.as_deref() else {
            tracing::warn!(function = %target.name, "Log result not available, no startup duration");
            return Ok(InvocationOutcome::NoSample);
        };
        let outcome = self.extract_from_tail(encoded)?;
        if matches!(outcome, InvocationOutcome::NoSample) {
            tracing::debug!(function = %target.name, "No duration marker in log tail, warm start");
        }
        Ok(outcome)
    }
}

/// How long the remote-poll strategy keeps waiting for the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the marker shows up.
    pub timeout: Option<Duration>,
    pub read_limit: i32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_POLL_TIMEOUT),
            read_limit: DEFAULT_READ_LIMIT,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStreamPointer {
    log_stream: String,
    #[serde(default)]
    request_id: Option<String>,
}

fn is_report_for(entry: &str, request_id: &str) -> bool {
    entry
        .trim_start()
        .strip_prefix("REPORT RequestId: ")
        .and_then(|rest| rest.split_whitespace().next())
        == Some(request_id)
}

/// Reads the invocation's log stream from the log store, retrying until the
/// marker has been ingested.
pub struct RemotePollExtractor {
    store: Arc<dyn LogStore>,
    scanner: MarkerScanner,
    policy: PollPolicy,
    log_group_prefix: String,
}

impl RemotePollExtractor {
    pub fn new(store: Arc<dyn LogStore>, scanner: MarkerScanner, policy: PollPolicy) -> Self {
        Self {
            store,
            scanner,
            policy,
            log_group_prefix: DEFAULT_LOG_GROUP_PREFIX.to_string(),
        }
    }

    pub fn with_log_group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_group_prefix = prefix.into();
        self
    }

    /// Polls one stream until a marker is found, the bound expires or the
    /// scope is cancelled. With a request id only that request's REPORT
    /// entry is considered, and a REPORT without a marker is a warm start.
    pub async fn poll_stream(
        &self,
        log_group: &str,
        log_stream: &str,
        request_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<InvocationOutcome, ExtractError> {
        let deadline = self.policy.timeout.map(|t| Instant::now() + t);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            attempt += 1;

            match self
                .store
                .read_recent_entries(log_group, log_stream, self.policy.read_limit)
                .await
            {
                Ok(entries) => {
                    // Newest entries first: the REPORT line is at the tail.
                    if let Some(id) = request_id {
                        if let Some(entry) = entries.iter().rev().find(|e| is_report_for(e, id)) {
                            return Ok(match self.scanner.scan(entry)? {
                                Some((kind, latency_ms)) => {
                                    tracing::debug!(%log_stream, request_id = %id, attempt, ?kind, latency_ms, "Duration marker found");
                                    InvocationOutcome::Sample { latency_ms, kind }
                                }
                                None => {
                                    tracing::debug!(%log_stream, request_id = %id, "REPORT without duration marker, warm start");
                                    InvocationOutcome::NoSample
                                }
                            });
                        }
                    } else {
                        for entry in entries.iter().rev() {
                            if let Some((kind, latency_ms)) = self.scanner.scan(entry)? {
                                tracing::debug!(%log_stream, attempt, ?kind, latency_ms, "Duration marker found");
                                return Ok(InvocationOutcome::Sample { latency_ms, kind });
                            }
                        }
                    }
                    tracing::trace!(%log_stream, attempt, entries = entries.len(), "Marker not ingested yet");
                }
                Err(LogStoreError::NotFound(msg)) => {
                    tracing::trace!(%log_stream, attempt, error = %msg, "Log stream not available yet");
                }
                Err(LogStoreError::Other(msg)) => return Err(ExtractError::LogStore(msg)),
            }

            if let Some(deadline) = deadline {
                if Instant::now() + self.policy.interval > deadline {
                    tracing::warn!(%log_group, %log_stream, attempt, "Gave up waiting for a duration marker");
                    return Ok(InvocationOutcome::TimedOut);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }
}

#[async_trait]
impl DurationExtractor for RemotePollExtractor {
    fn wants_log_tail(&self) -> bool {
        false
    }

    async fn extract(
        &self,
        target: &FunctionDescriptor,
        response: &InvocationResponse,
        cancel: &CancellationToken,
    ) -> Result<InvocationOutcome, ExtractError> {
        let pointer: LogStreamPointer = serde_json::from_slice(&response.payload)
            .map_err(|e| ExtractError::MissingLogStream(e.to_string()))?;
        let log_group = format!("{}{}", self.log_group_prefix, target.name);
        self.poll_stream(
            &log_group,
            &pointer.log_stream,
            pointer.request_id.as_deref(),
            cancel,
        )
        .await
    }
}
