use clap::{ArgGroup, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_TAG_KEY: &str = "language";
pub const DEFAULT_LOG_SOURCE: LogSource = LogSource::Inline;
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Info;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 60_000;

/// Where the start-up duration is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Tail returned inline with the invocation response (default)
    Inline,
    /// Poll the function's log stream named in the response payload
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Level implied by `-v` repetitions.
    pub fn from_verbosity(verbose: u8) -> Self {
        match verbose {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// coldsweep: Invoke every matching Lambda function once and report cold-start durations.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
#[clap(group(
    ArgGroup::new("payload_source")
        .required(false)
        .args(["payload", "payload_file"]),
))]
#[clap(group(
    ArgGroup::new("selection")
        .required(false)
        .args(["select", "select_regex"]),
))]
pub struct CliArgs {
    /// Only benchmark functions whose language tag has this value.
    #[arg(short = 'l', long)]
    pub language: Option<String>,

    /// Tag key holding the language [default: language]
    #[arg(long)]
    pub tag_key: Option<String>,

    /// Alias or version qualifier used for every invocation.
    #[arg(short = 'a', long)]
    pub alias: Option<String>,

    /// Maximum invocations in flight. 0, negative or unset means unbounded.
    #[arg(short = 'c', long, allow_negative_numbers = true)]
    pub concurrency: Option<i64>,

    /// Functions requested per listing page [default: 50]
    #[arg(long, value_parser = clap::value_parser!(i32).range(1..=10_000))]
    pub page_size: Option<i32>,

    /// Only benchmark functions whose name contains this substring.
    #[arg(long)]
    pub select: Option<String>,

    /// Only benchmark functions whose name matches this regular expression.
    #[arg(long)]
    pub select_regex: Option<String>,

    /// JSON payload sent with every invocation.
    #[arg(long)]
    pub payload: Option<String>,

    /// File holding the JSON payload sent with every invocation.
    #[arg(long)]
    pub payload_file: Option<PathBuf>,

    /// Where the start-up duration is read from [default: inline]
    #[arg(long, value_enum, help_heading = "Log Source")]
    pub log_source: Option<LogSource>,

    /// Log group prefix the function name is appended to [default: /aws/lambda/]
    #[arg(long, help_heading = "Log Source")]
    pub log_group_prefix: Option<String>,

    /// Delay between log stream reads, e.g. "1s" or "500ms" [default: 1s]
    #[arg(long, value_parser = parse_duration_to_millis, help_heading = "Log Source")]
    pub poll_interval: Option<u64>,

    /// Give up on a log stream after this long, e.g. "60s" or "2m" [default: 60s]
    #[arg(
        long,
        value_parser = parse_duration_to_millis,
        conflicts_with = "poll_forever",
        help_heading = "Log Source"
    )]
    pub poll_timeout: Option<u64>,

    /// Keep polling a log stream until the duration line shows up.
    #[arg(long, help_heading = "Log Source")]
    pub poll_forever: bool,

    /// AWS Region to use. Defaults to environment/profile configuration.
    #[arg(short = 'r', long = "aws-region")]
    pub aws_region: Option<String>,

    /// AWS Profile to use. Defaults to environment/profile configuration.
    #[arg(short = 'p', long = "aws-profile")]
    pub aws_profile: Option<String>,

    /// Load configuration from a specific profile in .coldsweep.toml.
    #[arg(long)]
    pub config_profile: Option<String>,

    /// Write a JSON report of the run to this path.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Print a breakdown table to stderr after the summary line.
    #[arg(long)]
    pub details: bool,

    /// Log level [default: info]
    #[arg(long, value_enum, conflicts_with = "verbose")]
    pub log_level: Option<LogLevel>,

    /// Increase logging verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parses "500ms", "1s", "2m", "1h" or a bare number of seconds into milliseconds.
pub fn parse_duration_to_millis(value: &str) -> Result<u64, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", value))?;

    let factor = match unit {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60 * 1_000,
        "h" => 60 * 60 * 1_000,
        other => {
            return Err(format!(
                "unknown unit '{}' in duration '{}' (use ms, s, m or h)",
                other, value
            ))
        }
    };
    amount
        .checked_mul(factor)
        .ok_or_else(|| format!("duration '{}' is too large", value))
}

/// Formats milliseconds using the largest whole unit.
pub fn format_millis(millis: u64) -> String {
    if millis == 0 {
        return "0ms".to_string();
    }
    if millis % (60 * 60 * 1000) == 0 {
        format!("{}h", millis / (60 * 60 * 1000))
    } else if millis % (60 * 1000) == 0 {
        format!("{}m", millis / (60 * 1000))
    } else if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}
