use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the herdcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "herdcache",
    version,
    about = "Coalescing two-tier HTTP response cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "HERDCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Fetch URLs through the cache and report where each response came from.
    Fetch(FetchArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    #[command(flatten)]
    pub overrides: FetchOverrides,

    /// URLs to fetch. Each one is a separate cache key.
    #[arg(value_name = "URL", required = true, num_args = 1.., value_hint = ValueHint::Url)]
    pub urls: Vec<String>,

    /// Number of rounds to fetch every URL.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Concurrent requests issued per URL in each round.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,

    /// Persist the hot tier to the cold store before exiting.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub dump: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FetchOverrides {
    /// Directory backing the cold tier; the cold tier is disabled without one.
    #[arg(long = "cold-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cold_dir: Option<PathBuf>,

    /// Override the hot store capacity in bytes.
    #[arg(long = "cache-capacity-bytes", value_name = "BYTES")]
    pub cache_capacity_bytes: Option<u64>,

    /// Override the ceiling on how long an entry may stay in the hot store.
    #[arg(long = "cache-max-age-seconds", value_name = "SECONDS")]
    pub cache_max_age_seconds: Option<u64>,

    /// Override how long a waiter blocks on an in-flight fetch before retrying.
    #[arg(long = "cache-busy-timeout-ms", value_name = "MILLIS")]
    pub cache_busy_timeout_ms: Option<u64>,

    /// Override the origin request timeout.
    #[arg(long = "origin-timeout-seconds", value_name = "SECONDS")]
    pub origin_timeout_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
