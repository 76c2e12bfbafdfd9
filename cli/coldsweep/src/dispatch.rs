//! Concurrent invocation of discovered functions.
//!
//! Every descriptor becomes one task. A semaphore shared by all pages of a
//! run bounds how many invocations are in flight, and a cancellation token
//! shared with the coordinator stops new work after the first fatal error.
//! Invocations already in flight are never aborted: they are billable and
//! cannot be taken back, so they are allowed to finish and are drained.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{BenchError, ExtractError};
use crate::extract::DurationExtractor;
use crate::service::{InvocationService, ServiceError};
use crate::stats::StatisticsAggregator;
use crate::types::{FunctionDescriptor, InvocationOutcome, InvocationRequest};

pub struct InvocationDispatcher {
    service: Arc<dyn InvocationService>,
    extractor: Arc<dyn DurationExtractor>,
    aggregator: Arc<StatisticsAggregator>,
    permits: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    alias: Option<String>,
    payload: Option<Vec<u8>>,
}

impl InvocationDispatcher {
    pub fn new(
        service: Arc<dyn InvocationService>,
        extractor: Arc<dyn DurationExtractor>,
        aggregator: Arc<StatisticsAggregator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            extractor,
            aggregator,
            permits: None,
            cancel,
            alias: None,
            payload: None,
        }
    }

    /// `None`, zero or a limit beyond what a semaphore can hold means
    /// unbounded.
    pub fn with_concurrency_limit(mut self, limit: Option<usize>) -> Self {
        self.permits = limit
            .filter(|n| *n > 0 && *n < Semaphore::MAX_PERMITS)
            .map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias.filter(|a| !a.is_empty());
        self
    }

    pub fn with_payload(mut self, payload: Option<Vec<u8>>) -> Self {
        self.payload = payload;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Invokes every descriptor once and returns the outcomes in completion
    /// order. Descriptors whose work had not started when the scope was
    /// cancelled produce no outcome. The first fatal error is returned after
    /// all started workers have finished.
    pub async fn dispatch(
        &self,
        descriptors: Vec<FunctionDescriptor>,
    ) -> Result<Vec<InvocationOutcome>, BenchError> {
        let mut workers = JoinSet::new();
        let log_tail = self.extractor.wants_log_tail();

        for target in descriptors {
            let worker = Worker {
                service: Arc::clone(&self.service),
                extractor: Arc::clone(&self.extractor),
                aggregator: Arc::clone(&self.aggregator),
                permits: self.permits.clone(),
                cancel: self.cancel.clone(),
                request: InvocationRequest {
                    target,
                    alias: self.alias.clone(),
                    payload: self.payload.clone(),
                    log_tail,
                },
            };
            workers.spawn(worker.run());
        }

        let mut outcomes = Vec::with_capacity(workers.len());
        let mut first_error: Option<BenchError> = None;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(InvocationOutcome::Failed(err))) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(join_err) => {
                    self.cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(BenchError::Worker(join_err.to_string()));
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }
}

struct Worker {
    service: Arc<dyn InvocationService>,
    extractor: Arc<dyn DurationExtractor>,
    aggregator: Arc<StatisticsAggregator>,
    permits: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    request: InvocationRequest,
}

impl Worker {
    async fn run(self) -> Option<InvocationOutcome> {
        // Held until the outcome is recorded and, on failure, the scope is
        // cancelled, so the next waiter always observes the cancellation.
        let _permit: Option<OwnedSemaphorePermit> = match &self.permits {
            Some(permits) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                permit = Arc::clone(permits).acquire_owned() => Some(permit.ok()?),
            },
            None => None,
        };

        if self.cancel.is_cancelled() {
            tracing::trace!(function = %self.request.target.name, "Run cancelled, skipping invocation");
            return None;
        }

        let outcome = self.invoke_once().await?;
        tracing::debug!(function = %self.request.target.name, outcome = outcome.label(), "Invocation finished");
        if let InvocationOutcome::Failed(err) = &outcome {
            tracing::error!(function = %self.request.target.name, error = %err, "Invocation failed, cancelling run");
            self.cancel.cancel();
        }
        self.aggregator.record(&outcome).await;
        Some(outcome)
    }

    async fn invoke_once(&self) -> Option<InvocationOutcome> {
        let target = &self.request.target;
        tracing::info!(function = %target.name, alias = ?self.request.alias, "Invoking function");

        let response = match self.service.invoke(&self.request).await {
            Ok(response) => response,
            Err(ServiceError::Throttled(msg)) => {
                tracing::warn!(function = %target.name, reason = %msg, "Invocation throttled");
                return Some(InvocationOutcome::Throttled);
            }
            Err(ServiceError::Other(message)) => {
                return Some(InvocationOutcome::Failed(BenchError::Invocation {
                    function: target.name.clone(),
                    message,
                }));
            }
        };

        if let Some(function_error) = &response.function_error {
            tracing::warn!(
                function = %target.name,
                status_code = response.status_code,
                %function_error,
                "Function reported an error"
            );
        }

        match self.extractor.extract(target, &response, &self.cancel).await {
            Ok(outcome) => {
                match &outcome {
                    InvocationOutcome::Sample { latency_ms, kind } => {
                        tracing::info!(function = %target.name, marker = kind.marker(), value = latency_ms, "Startup duration found");
                    }
                    InvocationOutcome::NoSample => {
                        tracing::debug!(function = %target.name, "Warm start, no startup duration");
                    }
                    _ => {}
                }
                Some(outcome)
            }
            // Whoever cancelled the scope reports why.
            Err(ExtractError::Cancelled) => None,
            Err(source) => Some(InvocationOutcome::Failed(BenchError::Extraction {
                function: target.name.clone(),
                source,
            })),
        }
    }
}
