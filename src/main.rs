// src/main.rs

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use voxpopuli::config::Config;
use voxpopuli::ingest::{Dataset, DatasetLinker, IngestOptions};
use voxpopuli::media::fetcher::{CommandFetcher, MediaFetcher, SkipFetcher};
use voxpopuli::media::relocate::{load_manifest, relocate_assets};
use voxpopuli::routes;
use voxpopuli::state::AppState;
use voxpopuli::store::postgres::{connect_with_retry, run_migrations};
use voxpopuli::store::{MemoryStore, PersistenceGateway, PgStore};

const DB_CONNECT_RETRIES: u32 = 5;

#[derive(Parser)]
#[command(name = "voxpopuli")]
#[command(about = "VoxPopuli dataset ingestion and media query API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the read-only query API
    Serve {
        /// Listen address (overrides BIND_ADDR)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Import the JSON dumps into the database
    Ingest {
        /// Directory holding trophies.json, awards.json, subreddits.json, users.json and posts.json
        #[arg(long)]
        dataset_dir: Option<PathBuf>,

        /// Link into an in-memory store instead of Postgres
        #[arg(long)]
        dry_run: bool,

        /// Abort on the first failing record
        #[arg(long)]
        fail_fast: bool,

        /// Keep remote media URLs instead of downloading
        #[arg(long)]
        skip_media: bool,
    },
    /// Rewrite stored media references from an upload manifest
    Relocate {
        /// JSON object mapping local references to hosted URLs
        #[arg(long)]
        manifest: PathBuf,
    },
}

/// Stdout plus a daily-rolling `app.log`. Media fetch problems and resize
/// events are additionally written to `media-fetch.log`.
fn init_tracing(config: &Config) -> Vec<WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, app_guard) = tracing_appender::non_blocking(file_appender);
    let fetch_appender = tracing_appender::rolling::daily(&config.log_dir, "media-fetch.log");
    let (fetch_writer, fetch_guard) = tracing_appender::non_blocking(fetch_appender);

    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    let fetch_layer = fmt::layer()
        .with_writer(fetch_writer)
        .with_ansi(false)
        .with_filter(Targets::new().with_target("media_fetch", Level::TRACE));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .with(fetch_layer)
        .init();

    vec![app_guard, fetch_guard]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from environment (.env included)
    let config = Config::from_env()?;
    let _guards = init_tracing(&config);

    match cli.command {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Ingest {
            dataset_dir,
            dry_run,
            fail_fast,
            skip_media,
        } => ingest(config, dataset_dir, dry_run, fail_fast, skip_media).await,
        Command::Relocate { manifest } => relocate(config, manifest).await,
    }
}

async fn connect(config: &Config) -> anyhow::Result<sqlx::PgPool> {
    let pool = connect_with_retry(config.require_database_url()?, DB_CONNECT_RETRIES).await?;
    tracing::info!("Database connected...");

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let pool = connect(&config).await?;
    let addr = bind.unwrap_or_else(|| config.bind_addr.clone());

    let state = AppState { pool };

    // Create the Axum application router
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn ingest(
    config: Config,
    dataset_dir: Option<PathBuf>,
    dry_run: bool,
    fail_fast: bool,
    skip_media: bool,
) -> anyhow::Result<()> {
    let dataset_dir = dataset_dir.unwrap_or_else(|| config.dataset_dir.clone());
    tracing::info!("Loading dataset from {}", dataset_dir.display());
    let dataset = Dataset::load(&dataset_dir).await?;

    let store: Box<dyn PersistenceGateway> = if dry_run {
        tracing::info!("Dry run: linking into an in-memory store.");
        Box::new(MemoryStore::new())
    } else {
        Box::new(PgStore::new(connect(&config).await?))
    };
    let fetcher: Box<dyn MediaFetcher> = if skip_media {
        Box::new(SkipFetcher)
    } else {
        Box::new(CommandFetcher::new(config.media_dir.clone(), config.fetch_timeout()))
    };

    let options = IngestOptions {
        fail_fast,
        fetch_concurrency: config.fetch_concurrency,
        target_height: config.target_height,
    };
    let report = DatasetLinker::new(store.as_ref(), fetcher.as_ref(), options)
        .run(&dataset)
        .await?;

    if !report.is_clean() {
        tracing::warn!("{} record(s) failed, see the report", report.failures.len());
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn relocate(config: Config, manifest: PathBuf) -> anyhow::Result<()> {
    let manifest = load_manifest(&manifest).await?;
    let store = PgStore::new(connect(&config).await?);

    let report = relocate_assets(&store, &manifest).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
