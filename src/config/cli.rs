use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Parley binary.
#[derive(Debug, Parser)]
#[command(
    name = "parley",
    version,
    about = "Cache-first write-behind persistence for chats"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PARLEY_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Connect the store and cache and run the write-behind worker until Ctrl-C.
    Serve(Box<ServeArgs>),
    /// Apply pending database migrations and exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the number of connections kept warm.
    #[arg(long = "database-min-connections", value_name = "COUNT")]
    pub database_min_connections: Option<u32>,

    /// Override the per-statement timeout.
    #[arg(long = "database-statement-timeout-ms", value_name = "MILLIS")]
    pub database_statement_timeout_ms: Option<u64>,

    /// Override the cache URL (redis://...).
    #[arg(long = "cache-url", value_name = "URL")]
    pub cache_url: Option<String>,

    /// Override the cooldown after a cache name-resolution failure.
    #[arg(long = "cache-dns-cooldown-seconds", value_name = "SECONDS")]
    pub cache_dns_cooldown_seconds: Option<u64>,

    /// Override the write-behind retry ceiling.
    #[arg(long = "write-behind-max-retries", value_name = "COUNT")]
    pub write_behind_max_retries: Option<u32>,

    /// Override the delay between write-behind drain ticks.
    #[arg(long = "write-behind-drain-delay-ms", value_name = "MILLIS")]
    pub write_behind_drain_delay_ms: Option<u64>,
}
