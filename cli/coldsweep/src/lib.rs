#![doc = include_str!("../README.md")]
//! `coldsweep` invokes every Lambda function matching a tag filter exactly
//! once, reads the cold-start duration the platform reports for each
//! invocation, and summarizes them across the fleet.

pub mod aws;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod report;
pub mod run;
pub mod service;
pub mod stats;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result};
use aws_config::SdkConfig;
use chrono::Utc;
use regex::Regex;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::aws::{load_sdk_config, CloudWatchLogStore, LambdaService};
use crate::catalog::NameFilter;
pub use crate::cli::CliArgs;
use crate::cli::{LogLevel, LogSource};
use crate::config::{load_and_resolve_config, EffectiveConfig, PayloadSource, Selection};
use crate::extract::{
    DurationExtractor, InlineExtractor, MarkerScanner, PollPolicy, RemotePollExtractor,
    DEFAULT_READ_LIMIT,
};
use crate::report::{save_report, ReportConfig, RunReport};
use crate::run::{RunCoordinator, RunOptions};
use crate::service::InvocationService;
use crate::types::TagFilter;

/// Logs go to stderr so stdout only carries the summary line.
pub fn init_logging(level: LogLevel) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .parse_lossy(format!("{}={}", env!("CARGO_PKG_NAME"), level.as_str())),
        )
        .init();
}

/// Reads and validates the invocation payload. It must be valid JSON.
pub fn load_payload(source: Option<&PayloadSource>) -> Result<Option<Vec<u8>>> {
    let bytes = match source {
        None => return Ok(None),
        Some(PayloadSource::Inline(text)) => text.as_bytes().to_vec(),
        Some(PayloadSource::File(path)) => fs::read(path)
            .with_context(|| format!("Failed to read payload file: {}", path.display()))?,
    };
    serde_json::from_slice::<serde_json::Value>(&bytes).context("Payload is not valid JSON")?;
    Ok(Some(bytes))
}

pub fn build_name_filter(selection: Option<&Selection>) -> Result<Option<NameFilter>> {
    Ok(match selection {
        None => None,
        Some(Selection::Substring(s)) => Some(NameFilter::Substring(s.clone())),
        Some(Selection::Regex(pattern)) => Some(NameFilter::Regex(
            Regex::new(pattern)
                .with_context(|| format!("Invalid --select-regex pattern '{}'", pattern))?,
        )),
    })
}

fn build_extractor(config: &EffectiveConfig, sdk_config: &SdkConfig) -> Arc<dyn DurationExtractor> {
    let scanner = MarkerScanner::new();
    match config.log_source {
        LogSource::Inline => Arc::new(InlineExtractor::new(scanner)),
        LogSource::Remote => {
            let policy = PollPolicy {
                interval: Duration::from_millis(config.poll_interval_ms),
                timeout: config.poll_timeout_ms.map(Duration::from_millis),
                read_limit: DEFAULT_READ_LIMIT,
            };
            let store = Arc::new(CloudWatchLogStore::new(sdk_config));
            Arc::new(
                RemotePollExtractor::new(store, scanner, policy)
                    .with_log_group_prefix(&config.log_group_prefix),
            )
        }
    }
}

/// Runs one benchmark from parsed arguments to the printed summary.
pub async fn run_coldsweep(args: CliArgs) -> Result<()> {
    let config = load_and_resolve_config(&args)?;
    init_logging(config.log_level);
    if let Some(profile) = &config.profile {
        tracing::debug!(%profile, "Loaded configuration from profile");
    }
    tracing::debug!(?config, "Resolved configuration");

    let payload = load_payload(config.payload.as_ref())?;
    let name_filter = build_name_filter(config.selection.as_ref())?;
    let tag_filter = config
        .language
        .as_ref()
        .map(|value| TagFilter::new(&config.tag_key, value));
    if tag_filter.is_none() {
        tracing::warn!("No language filter given, every listed function will be invoked");
    }

    let sdk_config = load_sdk_config(config.aws_region.clone(), config.aws_profile.clone()).await;
    let service: Arc<dyn InvocationService> = Arc::new(LambdaService::new(&sdk_config));
    let extractor = build_extractor(&config, &sdk_config);
    tracing::info!(
        log_source = ?config.log_source,
        concurrency = ?config.concurrency,
        alias = ?config.alias,
        poll_timeout = %config.poll_timeout_display(),
        "Starting benchmark run"
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl-C, waiting for in-flight invocations");
            signal_token.cancel();
        }
    });

    let options = RunOptions {
        tag_filter,
        name_filter,
        alias: config.alias.clone(),
        payload,
        concurrency: config.concurrency,
        page_size: config.page_size,
    };
    let started_at = Utc::now();
    let outcome = RunCoordinator::new(service, extractor, options, cancel)
        .run()
        .await;
    ctrl_c.abort();
    let stats = outcome?;
    let finished_at = Utc::now();

    println!("{}", stats.result());

    if config.details {
        console::print_details(&stats);
    }

    if let Some(path) = &config.output {
        let report_config = ReportConfig {
            tag_key: config.tag_key.clone(),
            language: config.language.clone(),
            alias: config.alias.clone(),
            concurrency: config.concurrency,
            log_source: config.log_source,
            region: sdk_config.region().map(|r| r.to_string()),
        };
        let report = RunReport::new(report_config, started_at, finished_at, &stats);
        save_report(&report, path)?;
    }

    Ok(())
}
