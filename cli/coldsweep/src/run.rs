//! Drives one benchmark run from discovery to frozen statistics.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{FunctionCatalog, NameFilter, DEFAULT_PAGE_SIZE};
use crate::dispatch::InvocationDispatcher;
use crate::error::BenchError;
use crate::extract::DurationExtractor;
use crate::service::InvocationService;
use crate::stats::{RunStatistics, StatisticsAggregator};
use crate::types::TagFilter;

/// Knobs of a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub tag_filter: Option<TagFilter>,
    pub name_filter: Option<NameFilter>,
    pub alias: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub concurrency: Option<usize>,
    pub page_size: i32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tag_filter: None,
            name_filter: None,
            alias: None,
            payload: None,
            concurrency: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub struct RunCoordinator {
    catalog: FunctionCatalog,
    tag_filter: Option<TagFilter>,
    dispatcher: InvocationDispatcher,
    aggregator: Arc<StatisticsAggregator>,
}

impl RunCoordinator {
    /// `cancel` is the run's single cancellation scope. Cancelling it from
    /// outside (e.g. on Ctrl-C) stops the run after in-flight calls finish.
    pub fn new(
        service: Arc<dyn InvocationService>,
        extractor: Arc<dyn DurationExtractor>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        let catalog = FunctionCatalog::new(Arc::clone(&service))
            .with_page_size(options.page_size)
            .with_name_filter(options.name_filter);
        let aggregator = Arc::new(StatisticsAggregator::new());
        let dispatcher =
            InvocationDispatcher::new(service, extractor, Arc::clone(&aggregator), cancel)
                .with_concurrency_limit(options.concurrency)
                .with_alias(options.alias)
                .with_payload(options.payload);

        Self {
            catalog,
            tag_filter: options.tag_filter,
            dispatcher,
            aggregator,
        }
    }

    pub async fn run(self) -> Result<RunStatistics, BenchError> {
        let RunCoordinator {
            catalog,
            tag_filter,
            dispatcher,
            aggregator,
        } = self;
        let cancel = dispatcher.cancellation().clone();
        let mut pages = catalog.pages(tag_filter);
        let mut page_number = 0usize;
        let mut dispatched = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BenchError::Cancelled),
                next = pages.next_page() => next,
            };
            let page = match next {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(err) => {
                    cancel.cancel();
                    return Err(err);
                }
            };
            page_number += 1;
            if page.is_empty() {
                continue;
            }

            for function in &page {
                tracing::info!(arn = %function.arn, "Found function");
            }
            dispatched += page.len();
            tracing::debug!(page = page_number, functions = page.len(), "Dispatching page");
            dispatcher.dispatch(page).await?;
        }

        if cancel.is_cancelled() {
            return Err(BenchError::Cancelled);
        }

        drop(dispatcher);
        let aggregator = Arc::try_unwrap(aggregator).map_err(|_| {
            BenchError::Worker("statistics still referenced after the run drained".to_string())
        })?;
        let stats = aggregator.finalize();

        tracing::info!(
            pages = page_number,
            dispatched,
            samples = stats.count(),
            throttled = stats.tally().throttled,
            warm = stats.tally().no_sample,
            "Benchmark run complete"
        );
        Ok(stats)
    }
}
