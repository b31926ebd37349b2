mod cli;

use crate::cli::{Command, LogFormat, StorageBackendArg, CLI};
use burrow_core::Repository;
use burrow_shortener::{
    Lookup, ShortCode, Shortened, Shortener, ShortenerService, ShortenerSettings, StorageError,
};
use burrow_storage::{
    CheckpointStats, InMemoryRepository, JournalRepository, PostgresRepository,
};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long `delete` waits for the worker before shutting down.
const DELETE_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Backend-specific maintenance the generic command runner can call.
trait Maintenance: Repository {
    fn checkpoint(&self) -> Result<Option<CheckpointStats>, StorageError> {
        Ok(None)
    }
}

impl Maintenance for InMemoryRepository {}

impl Maintenance for PostgresRepository {}

impl Maintenance for JournalRepository {
    fn checkpoint(&self) -> Result<Option<CheckpointStats>, StorageError> {
        JournalRepository::checkpoint(self).map(Some)
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = CLI::parse();
    init_tracing(&config)?;

    let backend = config.backend();
    info!(storage_backend = %backend, base_url = config.base_url(), "starting burrow");

    let settings = ShortenerSettings::default();
    match backend {
        StorageBackendArg::Memory => {
            run(ShortenerService::start(InMemoryRepository::new(), settings), &config).await
        }
        StorageBackendArg::File => {
            let path = config
                .file_storage_path
                .clone()
                .ok_or("file storage path is required when storage backend is file")?;
            let repository = JournalRepository::open(path)?;
            let replay = repository.replay_stats();
            if replay.skipped > 0 {
                warn!(
                    skipped = replay.skipped,
                    truncated_bytes = replay.truncated_bytes,
                    "journal contained unreadable lines"
                );
            }
            run(ShortenerService::start(repository, settings), &config).await
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .database_dsn
                .as_deref()
                .ok_or("database dsn is required when storage backend is postgres")?;
            let repository = PostgresRepository::connect(dsn).await?;
            repository.ensure_schema().await?;
            run(ShortenerService::start(repository, settings), &config).await
        }
    }
}

fn init_tracing(config: &CLI) -> Result<(), BoxError> {
    let filter = EnvFilter::try_new(&config.log_level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.log_format {
        LogFormat::Json => builder.json().try_init()?,
        LogFormat::Text => builder.try_init()?,
    }
    Ok(())
}

async fn run<R: Maintenance>(service: ShortenerService<R>, config: &CLI) -> Result<(), BoxError> {
    let outcome = execute(&service, config).await;
    service.shutdown().await?;
    outcome
}

async fn execute<R: Maintenance>(service: &ShortenerService<R>, config: &CLI) -> Result<(), BoxError> {
    match &config.command {
        Command::Shorten { url } => {
            let owner = config.owner.as_deref().unwrap_or_default();
            let shortened = service.shorten(owner, url).await?;
            let output = serde_json::json!({
                "result": shortened.code().to_url(config.base_url()),
                "conflict": matches!(shortened, Shortened::Conflict(_)),
            });
            println!("{output}");
        }
        Command::Resolve { code } => {
            let code = ShortCode::new(code.as_str())?;
            match service.resolve(&code).await? {
                Lookup::Found(url) => println!("{url}"),
                Lookup::NotFound => return Err(format!("short code {code} not found").into()),
                Lookup::Deleted => return Err(format!("short code {code} was deleted").into()),
            }
        }
        Command::List => {
            let owner = require_owner(config)?;
            let listed: Vec<_> = service
                .list(owner)
                .await?
                .into_iter()
                .map(|record| {
                    serde_json::json!({
                        "short_url": record.short_code.to_url(config.base_url()),
                        "original_url": record.original_url,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listed)?);
        }
        Command::Delete { codes } => {
            let owner = require_owner(config)?;
            let codes = codes
                .iter()
                .map(|code| ShortCode::new(code.as_str()))
                .collect::<Result<Vec<_>, _>>()?;

            let before = service.worker_stats().processed();
            service.delete(owner, codes).await?;
            wait_for_worker(service, before + 1).await;
            println!("{}", serde_json::json!({ "deleted": service.worker_stats().flipped() }));
        }
        Command::Checkpoint => {
            let stats = service
                .repository()
                .checkpoint()?
                .ok_or("checkpoint is only supported by the file backend")?;
            println!(
                "{}",
                serde_json::json!({
                    "records": stats.records,
                    "bytes_before": stats.bytes_before,
                    "bytes_after": stats.bytes_after,
                })
            );
        }
        Command::Ping => {
            service.ping().await?;
            println!("ok");
        }
    }
    Ok(())
}

fn require_owner(config: &CLI) -> Result<&str, BoxError> {
    match config.owner.as_deref() {
        Some(owner) if !owner.is_empty() => Ok(owner),
        _ => Err("--owner is required for this command".into()),
    }
}

/// Gives the delete worker a chance to apply the request before shutdown
/// discards it.
async fn wait_for_worker<R: Repository>(service: &ShortenerService<R>, processed: u64) {
    let settled = tokio::time::timeout(DELETE_SETTLE_TIMEOUT, async {
        while service.worker_stats().processed() < processed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    if settled.is_err() {
        warn!("delete request still pending at shutdown");
    }
}
