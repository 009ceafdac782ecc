use std::{process, sync::Arc, time::Duration};

use parley::{
    application::{error::AppError, repos::DurableWriter},
    cache::{CacheBackend, CacheConfig, CacheStore, MemoryBackend},
    config::{self, LoadError},
    infra::{db::PostgresRepositories, error::InfraError, redis::RedisBackend, telemetry},
    write_behind::{WriteBehindConfig, WriteBehindQueue, WriteBehindService},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let chain = error.chain().join(": ");
    if dispatcher::has_been_set() {
        error!(error = %chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %chain, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| match err {
        LoadError::Invalid { .. } => AppError::validation(err.to_string()),
        LoadError::Build(_) => AppError::unexpected(format!("failed to load configuration: {err}")),
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = PostgresRepositories::connect(&settings.database).await?;
    PostgresRepositories::run_migrations(&pool).await?;
    info!(target = "parley::migrate", "Migrations applied");
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pool = PostgresRepositories::connect(&settings.database).await?;
    PostgresRepositories::run_migrations(&pool).await?;
    let repositories = Arc::new(PostgresRepositories::new(pool));

    let cache = CacheStore::new(
        cache_backend(&settings.cache)?,
        CacheConfig::from(&settings.cache),
    );
    if !cache.connect().await {
        warn!(
            target = "parley::serve",
            state = %cache.state(),
            "Cache unavailable at startup; serving from the database until it recovers"
        );
    }

    let writer: Arc<dyn DurableWriter> = repositories.clone();
    let queue = WriteBehindQueue::new(writer, WriteBehindConfig::from(&settings.write_behind));
    let service = WriteBehindService::new(cache.clone(), queue.clone());

    info!(
        target = "parley::serve",
        cache_backend = cache.backend_name(),
        "Persistence layer ready"
    );

    let health_handle = spawn_health_log(repositories, service.clone());

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;
    info!(
        target = "parley::serve",
        pending = queue.pending_len(),
        "Shutdown requested; draining write-behind queue"
    );

    health_handle.abort();
    let _ = health_handle.await;

    let drained = queue.wait_idle(settings.write_behind.shutdown_timeout).await;
    if drained {
        info!(target = "parley::serve", "Write-behind queue drained");
    } else {
        error!(
            target = "parley::serve",
            pending = queue.pending_len(),
            "Shutdown timeout elapsed with pending writes; they are lost"
        );
    }

    cache.close().await;
    Ok(())
}

fn cache_backend(settings: &config::CacheSettings) -> Result<Arc<dyn CacheBackend>, AppError> {
    match settings.url.as_deref() {
        Some(url) => Ok(Arc::new(RedisBackend::open(url)?)),
        None => {
            warn!(
                target = "parley::serve",
                "No cache URL configured; using the in-process cache"
            );
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

fn spawn_health_log(
    repositories: Arc<PostgresRepositories>,
    service: WriteBehindService,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let database_ok = repositories.health_check().await.is_ok();
            info!(
                target = "parley::health",
                database_ok,
                cache_state = %service.cache().state(),
                pending = service.queue().pending_len(),
                worker_active = service.queue().is_worker_active(),
                "Health snapshot"
            );
        }
    })
}
