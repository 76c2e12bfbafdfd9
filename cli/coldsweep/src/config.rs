//! Configuration loading and merging for `coldsweep`.
//!
//! Settings come from three layers, highest precedence first:
//! command-line arguments, a named profile, and the `[global]` table of an
//! optional `.coldsweep.toml` in the working directory.
//!
//! ```toml
//! version = 1.0
//!
//! [global]
//! aws-region = "eu-west-1"
//! concurrency = 10
//!
//! [profiles.rust-remote]
//! language = "rust"
//! log-source = "remote"
//! poll-timeout = "2m"
//! ```

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::{
    format_millis, parse_duration_to_millis, CliArgs, LogLevel, LogSource, DEFAULT_LOG_LEVEL,
    DEFAULT_LOG_SOURCE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_TAG_KEY,
};
use crate::catalog::DEFAULT_PAGE_SIZE;
use crate::extract::DEFAULT_LOG_GROUP_PREFIX;

const COLDSWEEP_TOML: &str = ".coldsweep.toml";

/// The whole `.coldsweep.toml` file.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: f32,

    #[serde(default)]
    pub global: Option<ProfileConfig>,

    #[serde(default)]
    pub profiles: IndexMap<String, ProfileConfig>,
}

/// Settings of one profile or of the global table. Mirrors `CliArgs`.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProfileConfig {
    pub language: Option<String>,
    pub tag_key: Option<String>,
    pub alias: Option<String>,
    pub concurrency: Option<i64>,
    pub page_size: Option<i32>,
    pub select: Option<String>,
    pub select_regex: Option<String>,
    pub payload: Option<String>,
    pub payload_file: Option<PathBuf>,

    pub log_source: Option<LogSource>,
    pub log_group_prefix: Option<String>,
    pub poll_interval: Option<String>,
    pub poll_timeout: Option<String>,
    pub poll_forever: Option<bool>,

    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,

    pub output: Option<PathBuf>,
    pub details: Option<bool>,
    pub log_level: Option<LogLevel>,
}

/// How functions are picked by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Substring(String),
    Regex(String),
}

/// Where the invocation payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    Inline(String),
    File(PathBuf),
}

/// The merged configuration after applying precedence rules.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    /// Profile selected with `--config-profile`, once it has been applied.
    pub profile: Option<String>,
    pub language: Option<String>,
    pub tag_key: String,
    pub alias: Option<String>,
    pub concurrency: Option<usize>,
    pub page_size: i32,
    pub selection: Option<Selection>,
    pub payload: Option<PayloadSource>,

    pub log_source: LogSource,
    pub log_group_prefix: String,
    pub poll_interval_ms: u64,
    /// `None` polls until the duration line shows up.
    pub poll_timeout_ms: Option<u64>,

    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,

    pub output: Option<PathBuf>,
    pub details: bool,
    pub log_level: LogLevel,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            profile: None,
            language: None,
            tag_key: DEFAULT_TAG_KEY.to_string(),
            alias: None,
            concurrency: None,
            page_size: DEFAULT_PAGE_SIZE,
            selection: None,
            payload: None,
            log_source: DEFAULT_LOG_SOURCE,
            log_group_prefix: DEFAULT_LOG_GROUP_PREFIX.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_timeout_ms: Some(DEFAULT_POLL_TIMEOUT_MS),
            aws_region: None,
            aws_profile: None,
            output: None,
            details: false,
            log_level: DEFAULT_LOG_LEVEL,
        }
    }
}

impl EffectiveConfig {
    /// Human-readable poll bound, for logs.
    pub fn poll_timeout_display(&self) -> String {
        self.poll_timeout_ms
            .map_or_else(|| "none".to_string(), format_millis)
    }
}

pub fn get_config_path() -> PathBuf {
    PathBuf::from(COLDSWEEP_TOML)
}

/// Resolves the effective configuration from `.coldsweep.toml` in the
/// working directory and the command line.
pub fn load_and_resolve_config(cli_args: &CliArgs) -> Result<EffectiveConfig> {
    resolve_config(&get_config_path(), cli_args)
}

pub fn resolve_config(config_path: &Path, cli_args: &CliArgs) -> Result<EffectiveConfig> {
    let mut effective = EffectiveConfig::default();

    let config_file = if config_path.exists() {
        Some(load_config_file(config_path)?)
    } else {
        None
    };

    if let Some(global) = config_file.as_ref().and_then(|c| c.global.as_ref()) {
        apply_profile_to_effective(global, &mut effective)?;
    }

    if let Some(profile_name) = &cli_args.config_profile {
        let profile = config_file
            .as_ref()
            .with_context(|| {
                format!(
                    "Configuration profile '{}' requested but config file '{}' does not exist",
                    profile_name,
                    config_path.display()
                )
            })?
            .profiles
            .get(profile_name)
            .with_context(|| {
                format!(
                    "Configuration profile '{}' not found in config file '{}'",
                    profile_name,
                    config_path.display()
                )
            })?;
        apply_profile_to_effective(profile, &mut effective)?;
        effective.profile = Some(profile_name.clone());
    }

    apply_cli_args_to_effective(cli_args, &mut effective);
    Ok(effective)
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML from config file: {}", path.display()))?;
    Ok(config)
}

fn parse_profile_duration(key: &str, value: &str) -> Result<u64> {
    parse_duration_to_millis(value)
        .map_err(|e| anyhow::anyhow!("Invalid duration for '{}' in config file: {}", key, e))
}

/// 0 and negative limits mean unbounded.
fn concurrency_limit(value: i64) -> Option<usize> {
    usize::try_from(value).ok().filter(|n| *n > 0)
}

fn apply_profile_to_effective(profile: &ProfileConfig, effective: &mut EffectiveConfig) -> Result<()> {
    if let Some(val) = &profile.language {
        effective.language = Some(val.clone());
    }
    if let Some(val) = &profile.tag_key {
        effective.tag_key = val.clone();
    }
    if let Some(val) = &profile.alias {
        effective.alias = Some(val.clone());
    }
    if let Some(val) = profile.concurrency {
        effective.concurrency = concurrency_limit(val);
    }
    if let Some(val) = profile.page_size {
        effective.page_size = val;
    }

    // A layer that names a selection replaces the lower layer's one entirely.
    if let Some(val) = &profile.select_regex {
        effective.selection = Some(Selection::Regex(val.clone()));
    } else if let Some(val) = &profile.select {
        effective.selection = Some(Selection::Substring(val.clone()));
    }
    if let Some(val) = &profile.payload_file {
        effective.payload = Some(PayloadSource::File(val.clone()));
    } else if let Some(val) = &profile.payload {
        effective.payload = Some(PayloadSource::Inline(val.clone()));
    }

    if let Some(val) = profile.log_source {
        effective.log_source = val;
    }
    if let Some(val) = &profile.log_group_prefix {
        effective.log_group_prefix = val.clone();
    }
    if let Some(val) = &profile.poll_interval {
        effective.poll_interval_ms = parse_profile_duration("poll-interval", val)?;
    }
    if profile.poll_forever == Some(true) {
        effective.poll_timeout_ms = None;
    } else if let Some(val) = &profile.poll_timeout {
        effective.poll_timeout_ms = Some(parse_profile_duration("poll-timeout", val)?);
    }

    if let Some(val) = &profile.aws_region {
        effective.aws_region = Some(val.clone());
    }
    if let Some(val) = &profile.aws_profile {
        effective.aws_profile = Some(val.clone());
    }
    if let Some(val) = &profile.output {
        effective.output = Some(val.clone());
    }
    if let Some(val) = profile.details {
        effective.details = val;
    }
    if let Some(val) = profile.log_level {
        effective.log_level = val;
    }
    Ok(())
}

fn apply_cli_args_to_effective(cli_args: &CliArgs, effective: &mut EffectiveConfig) {
    if cli_args.language.is_some() {
        effective.language = cli_args.language.clone();
    }
    if let Some(val) = &cli_args.tag_key {
        effective.tag_key = val.clone();
    }
    if cli_args.alias.is_some() {
        effective.alias = cli_args.alias.clone();
    }
    if let Some(val) = cli_args.concurrency {
        effective.concurrency = concurrency_limit(val);
    }
    if let Some(val) = cli_args.page_size {
        effective.page_size = val;
    }

    if let Some(val) = &cli_args.select_regex {
        effective.selection = Some(Selection::Regex(val.clone()));
    } else if let Some(val) = &cli_args.select {
        effective.selection = Some(Selection::Substring(val.clone()));
    }
    if let Some(val) = &cli_args.payload_file {
        effective.payload = Some(PayloadSource::File(val.clone()));
    } else if let Some(val) = &cli_args.payload {
        effective.payload = Some(PayloadSource::Inline(val.clone()));
    }

    if let Some(val) = cli_args.log_source {
        effective.log_source = val;
    }
    if let Some(val) = &cli_args.log_group_prefix {
        effective.log_group_prefix = val.clone();
    }
    if let Some(val) = cli_args.poll_interval {
        effective.poll_interval_ms = val;
    }
    if cli_args.poll_forever {
        effective.poll_timeout_ms = None;
    } else if let Some(val) = cli_args.poll_timeout {
        effective.poll_timeout_ms = Some(val);
    }

    if cli_args.aws_region.is_some() {
        effective.aws_region = cli_args.aws_region.clone();
    }
    if cli_args.aws_profile.is_some() {
        effective.aws_profile = cli_args.aws_profile.clone();
    }
    if cli_args.output.is_some() {
        effective.output = cli_args.output.clone();
    }
    if cli_args.details {
        effective.details = true;
    }
    if let Some(val) = cli_args.log_level {
        effective.log_level = val;
    } else if cli_args.verbose > 0 {
        effective.log_level = LogLevel::from_verbosity(cli_args.verbose);
    }
}
