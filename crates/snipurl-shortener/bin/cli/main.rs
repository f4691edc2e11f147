mod cli;

use crate::cli::{batch_items, Command, LogFormat, CLI};
use anyhow::{anyhow, Context};
use clap::Parser;
use snipurl_core::{Repository, Resolution, ShortCode, ShortenerError};
use snipurl_generator::ContentHashGenerator;
use snipurl_shortener::{DeletionPipeline, DeletionSettings, ShortenerService};
use snipurl_storage::{FileRepository, InMemoryRepository, PostgresRepository};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXIT_CONFLICT: u8 = 3;
const EXIT_NOT_FOUND: u8 = 4;
const EXIT_GONE: u8 = 5;

type Service = ShortenerService<dyn Repository, ContentHashGenerator>;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = CLI::parse();
    init_tracing(config.log_format)?;

    let (repository, postgres) = open_repository(&config).await?;
    let service = ShortenerService::new(
        Arc::clone(&repository),
        ContentHashGenerator::new(),
        config.base_url.as_str(),
    );

    info!(
        base_url = %service.base_url(),
        log_format = %config.log_format,
        "snipurl ready"
    );

    let settings = DeletionSettings::builder()
        .batch_size(config.delete_batch_size)
        .build();
    let outcome = dispatch(config.command, &service, repository, settings).await;

    if let Some(postgres) = postgres {
        postgres.close().await;
    }
    outcome
}

async fn dispatch(
    command: Command,
    service: &Service,
    repository: Arc<dyn Repository>,
    settings: DeletionSettings,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Shorten { url, owner } => shorten(service, &url, &owner).await,
        Command::Batch { owner, urls } => shorten_batch(service, &urls, &owner).await,
        Command::Resolve { code } => resolve(service, &code).await,
        Command::List { owner } => {
            let urls = service.owner_urls(&owner).await?;
            println!("{}", serde_json::to_string_pretty(&urls)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { owner, codes } => delete(repository, settings, &owner, codes).await,
        Command::Ping => {
            service.ping().await.context("storage backend is not reachable")?;
            println!("ok");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("install log bridge")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| anyhow!(err))
    .context("install tracing subscriber")
}

/// Picks the backend: a DSN wins over a file path, memory is the fallback.
///
/// The PostgreSQL handle is also returned on its own so its pool can be
/// closed once the command is done.
async fn open_repository(
    config: &CLI,
) -> anyhow::Result<(Arc<dyn Repository>, Option<PostgresRepository>)> {
    if let Some(dsn) = &config.database_dsn {
        let repository = PostgresRepository::connect(dsn)
            .await
            .context("connect to postgres")?;
        return Ok((Arc::new(repository.clone()), Some(repository)));
    }

    if let Some(path) = &config.file_storage_path {
        let repository = FileRepository::open(path)
            .await
            .with_context(|| format!("load url log {}", path.display()))?;
        return Ok((Arc::new(repository), None));
    }

    Ok((Arc::new(InMemoryRepository::new()), None))
}

async fn shorten(service: &Service, url: &str, owner: &str) -> anyhow::Result<ExitCode> {
    match service.shorten(url, owner).await {
        Ok(short_url) => {
            println!("{short_url}");
            Ok(ExitCode::SUCCESS)
        }
        Err(ShortenerError::Conflict { short_url }) => {
            println!("{short_url}");
            eprintln!("already shortened");
            Ok(ExitCode::from(EXIT_CONFLICT))
        }
        Err(err) => Err(err.into()),
    }
}

async fn shorten_batch(
    service: &Service,
    urls: &[String],
    owner: &str,
) -> anyhow::Result<ExitCode> {
    match service.shorten_batch(batch_items(urls), owner).await {
        Ok(entries) => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(ShortenerError::BatchConflict { entries, conflicts }) => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            eprintln!("{} of {} urls already shortened", conflicts.len(), entries.len());
            Ok(ExitCode::from(EXIT_CONFLICT))
        }
        Err(err) => Err(err.into()),
    }
}

async fn resolve(service: &Service, code: &str) -> anyhow::Result<ExitCode> {
    let code = ShortCode::new(code)?;

    match service.resolve(&code).await? {
        Resolution::Redirect(url) => {
            println!("{url}");
            Ok(ExitCode::SUCCESS)
        }
        Resolution::Gone => {
            eprintln!("{code} has been deleted");
            Ok(ExitCode::from(EXIT_GONE))
        }
        Resolution::NotFound => {
            eprintln!("{code} not found");
            Ok(ExitCode::from(EXIT_NOT_FOUND))
        }
    }
}

async fn delete(
    repository: Arc<dyn Repository>,
    settings: DeletionSettings,
    owner: &str,
    codes: Vec<String>,
) -> anyhow::Result<ExitCode> {
    let codes = codes
        .into_iter()
        .map(ShortCode::new)
        .collect::<Result<Vec<_>, _>>()?;

    let pipeline = DeletionPipeline::new(repository, settings);
    let shutdown = pipeline.shutdown_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let report = pipeline.run(owner, codes).await?;
    println!(
        "deleted {} of {} codes in {} batches",
        report.deleted, report.requested, report.batches
    );
    Ok(ExitCode::SUCCESS)
}
