//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, FetchArgs, FetchOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "herdcache";
const ENV_PREFIX: &str = "HERDCACHE";

const DEFAULT_CAPACITY_BYTES: u64 = 500 * 1024 * 1024;
const DEFAULT_MAX_AGE_SECS: u64 = 24 * 3600;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_ERROR_TTL_MS: u64 = 200;
const DEFAULT_COLD_MIN_TTL_SECS: u64 = 3600;
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("herdcache/", env!("CARGO_PKG_VERSION"));

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub cold: ColdSettings,
    pub origin: OriginSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capacity_bytes: NonZeroU64,
    pub max_age: Duration,
    pub busy_timeout: Duration,
    pub error_ttl: Duration,
    pub cold_min_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ColdSettings {
    /// `None` disables the cold tier.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Fetch(args) => raw.apply_fetch_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    cold: RawColdSettings,
    origin: RawOriginSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_fetch_overrides(&mut self, overrides: &FetchOverrides) {
        if let Some(directory) = overrides.cold_dir.as_ref() {
            self.cold.directory = Some(directory.clone());
        }
        if let Some(bytes) = overrides.cache_capacity_bytes {
            self.cache.capacity_bytes = Some(bytes);
        }
        if let Some(seconds) = overrides.cache_max_age_seconds {
            self.cache.max_age_seconds = Some(seconds);
        }
        if let Some(millis) = overrides.cache_busy_timeout_ms {
            self.cache.busy_timeout_ms = Some(millis);
        }
        if let Some(seconds) = overrides.origin_timeout_seconds {
            self.origin.timeout_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            cache,
            cold,
            origin,
            logging,
        } = raw;

        Ok(Self {
            cache: build_cache_settings(cache)?,
            cold: build_cold_settings(cold)?,
            origin: build_origin_settings(origin)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity = cache.capacity_bytes.unwrap_or(DEFAULT_CAPACITY_BYTES);
    let capacity_bytes = NonZeroU64::new(capacity)
        .ok_or_else(|| LoadError::invalid("cache.capacity_bytes", "must be greater than zero"))?;

    let max_age_secs = non_zero(
        cache.max_age_seconds.unwrap_or(DEFAULT_MAX_AGE_SECS),
        "cache.max_age_seconds",
    )?;
    let busy_timeout_ms = non_zero(
        cache.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
        "cache.busy_timeout_ms",
    )?;
    let error_ttl_ms = non_zero(
        cache.error_ttl_ms.unwrap_or(DEFAULT_ERROR_TTL_MS),
        "cache.error_ttl_ms",
    )?;
    let cold_min_ttl_secs = cache
        .cold_min_ttl_seconds
        .unwrap_or(DEFAULT_COLD_MIN_TTL_SECS);

    Ok(CacheSettings {
        capacity_bytes,
        max_age: Duration::from_secs(max_age_secs),
        busy_timeout: Duration::from_millis(busy_timeout_ms),
        error_ttl: Duration::from_millis(error_ttl_ms),
        cold_min_ttl: Duration::from_secs(cold_min_ttl_secs),
    })
}

fn build_cold_settings(cold: RawColdSettings) -> Result<ColdSettings, LoadError> {
    let directory = cold.directory.filter(|path| !path.as_os_str().is_empty());
    if let Some(path) = directory.as_ref()
        && path.is_file()
    {
        return Err(LoadError::invalid(
            "cold.directory",
            format!("`{}` is a file, not a directory", path.display()),
        ));
    }
    Ok(ColdSettings { directory })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let timeout_secs = non_zero(
        origin.timeout_seconds.unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS),
        "origin.timeout_seconds",
    )?;
    let user_agent = origin
        .user_agent
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    if user_agent.is_empty() {
        return Err(LoadError::invalid(
            "origin.user_agent",
            "must not be empty",
        ));
    }
    Ok(OriginSettings {
        timeout: Duration::from_secs(timeout_secs),
        user_agent,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    capacity_bytes: Option<u64>,
    max_age_seconds: Option<u64>,
    busy_timeout_ms: Option<u64>,
    error_ttl_ms: Option<u64>,
    cold_min_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawColdSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_zero(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests;
