//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, DatabaseOverride, MigrateArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "parley";
const ENV_PREFIX: &str = "PARLEY";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_DB_STATEMENT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_CACHE_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CACHE_RECONNECT_BACKOFF_MS: u64 = 1_000;
const DEFAULT_CACHE_DNS_COOLDOWN_SECS: u64 = 300;
const DEFAULT_CACHE_SCAN_COUNT: u64 = 100;
const DEFAULT_CACHE_MESSAGE_PAGE_LIMIT: u64 = 50;
const DEFAULT_CACHE_CHAT_LIST_LIMIT: u64 = 50;
const DEFAULT_WRITE_BEHIND_MAX_RETRIES: u32 = 3;
const DEFAULT_WRITE_BEHIND_DRAIN_DELAY_MS: u64 = 100;
const DEFAULT_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub write_behind: WriteBehindSettings,
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

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub min_connections: u32,
    pub statement_timeout: Duration,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// `None` selects the in-process backend.
    pub url: Option<String>,
    pub connect_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub dns_cooldown: Duration,
    pub scan_count: NonZeroUsize,
    pub message_page_limit: NonZeroU32,
    pub chat_list_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct WriteBehindSettings {
    pub max_retries: u32,
    pub drain_delay: Duration,
    /// How long `serve` waits for the queue to drain on shutdown.
    pub shutdown_timeout: Duration,
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

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    write_behind: RawWriteBehindSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(min) = overrides.database_min_connections {
            self.database.min_connections = Some(min);
        }
        if let Some(timeout) = overrides.database_statement_timeout_ms {
            self.database.statement_timeout_ms = Some(timeout);
        }
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
        if let Some(cooldown) = overrides.cache_dns_cooldown_seconds {
            self.cache.dns_cooldown_secs = Some(cooldown);
        }
        if let Some(retries) = overrides.write_behind_max_retries {
            self.write_behind.max_retries = Some(retries);
        }
        if let Some(delay) = overrides.write_behind_drain_delay_ms {
            self.write_behind.drain_delay_ms = Some(delay);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            write_behind,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            write_behind: build_write_behind_settings(write_behind)?,
        })
    }
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_empty(database.url);

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;
    let min_connections = database
        .min_connections
        .unwrap_or(DEFAULT_DB_MIN_CONNECTIONS)
        .min(max_connections.get());
    if let Some(requested) = database.min_connections
        && requested > max_connections.get()
    {
        return Err(LoadError::invalid(
            "database.min_connections",
            format!(
                "{requested} exceeds database.max_connections ({})",
                max_connections.get()
            ),
        ));
    }

    let statement_timeout = positive_millis(
        database
            .statement_timeout_ms
            .unwrap_or(DEFAULT_DB_STATEMENT_TIMEOUT_MS),
        "database.statement_timeout_ms",
    )?;
    let acquire_timeout = positive_millis(
        database
            .acquire_timeout_ms
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
        "database.acquire_timeout_ms",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        min_connections,
        statement_timeout,
        acquire_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let url = non_empty(cache.url);
    if let Some(url) = url.as_ref()
        && !(url.starts_with("redis://") || url.starts_with("rediss://"))
    {
        return Err(LoadError::invalid(
            "cache.url",
            format!("`{url}` is not a redis:// or rediss:// URL"),
        ));
    }

    let connect_timeout = positive_millis(
        cache
            .connect_timeout_ms
            .unwrap_or(DEFAULT_CACHE_CONNECT_TIMEOUT_MS),
        "cache.connect_timeout_ms",
    )?;
    let reconnect_backoff = Duration::from_millis(
        cache
            .reconnect_backoff_ms
            .unwrap_or(DEFAULT_CACHE_RECONNECT_BACKOFF_MS),
    );
    let dns_cooldown_secs = cache
        .dns_cooldown_secs
        .unwrap_or(DEFAULT_CACHE_DNS_COOLDOWN_SECS);
    if dns_cooldown_secs == 0 {
        return Err(LoadError::invalid(
            "cache.dns_cooldown_secs",
            "must be greater than zero",
        ));
    }

    let scan_count = non_zero_usize(
        cache.scan_count.unwrap_or(DEFAULT_CACHE_SCAN_COUNT),
        "cache.scan_count",
    )?;
    let message_page_limit = non_zero_u32(
        cache
            .message_page_limit
            .unwrap_or(DEFAULT_CACHE_MESSAGE_PAGE_LIMIT),
        "cache.message_page_limit",
    )?;
    let chat_list_limit = non_zero_usize(
        cache.chat_list_limit.unwrap_or(DEFAULT_CACHE_CHAT_LIST_LIMIT),
        "cache.chat_list_limit",
    )?;

    Ok(CacheSettings {
        url,
        connect_timeout,
        reconnect_backoff,
        dns_cooldown: Duration::from_secs(dns_cooldown_secs),
        scan_count,
        message_page_limit,
        chat_list_limit,
    })
}

fn build_write_behind_settings(
    write_behind: RawWriteBehindSettings,
) -> Result<WriteBehindSettings, LoadError> {
    let max_retries = write_behind
        .max_retries
        .unwrap_or(DEFAULT_WRITE_BEHIND_MAX_RETRIES);
    let drain_delay = positive_millis(
        write_behind
            .drain_delay_ms
            .unwrap_or(DEFAULT_WRITE_BEHIND_DRAIN_DELAY_MS),
        "write_behind.drain_delay_ms",
    )?;
    let shutdown_secs = write_behind
        .shutdown_timeout_secs
        .unwrap_or(DEFAULT_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS);

    Ok(WriteBehindSettings {
        max_retries,
        drain_delay,
        shutdown_timeout: Duration::from_secs(shutdown_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    min_connections: Option<u32>,
    statement_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    reconnect_backoff_ms: Option<u64>,
    dns_cooldown_secs: Option<u64>,
    scan_count: Option<u64>,
    message_page_limit: Option<u64>,
    chat_list_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWriteBehindSettings {
    max_retries: Option<u32>,
    drain_delay_ms: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
