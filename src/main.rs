//! Weather ingestion service binary

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weather_ingestion::sources::{OpenWeatherSource, WeatherSource};
use weather_ingestion::storage::{MeasurementStore, MemoryStore, PgStore};
use weather_ingestion::{
    api, Config, FailurePolicy, IngestionPipeline, IngestionService, PipelineConfig,
};

/// Weather Ingestion Service - rate-limited city weather harvesting
#[derive(Parser, Debug)]
#[command(name = "weather-ingestion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rate-limited weather measurement ingestion for a fixed city catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the trigger/progress HTTP API
    Serve,

    /// Run one ingestion in the foreground
    Ingest {
        /// Request id to record the run under
        #[arg(short, long)]
        request_id: String,

        /// Return the first city failure instead of collecting all
        #[arg(long)]
        fail_fast: bool,

        /// Per-fetch timeout (e.g. "10s", "1m")
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<std::time::Duration>,
    },

    /// Show progress of a run
    Progress {
        #[arg(short, long)]
        request_id: String,
    },

    /// Apply database migrations
    Migrate,

    /// Show effective configuration and catalog
    Status,
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Resolves on SIGTERM/SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting weather ingestion service");

    let config = Config::load()?;

    match cli.command {
        Commands::Serve => serve(config).await?,
        Commands::Ingest {
            request_id,
            fail_fast,
            timeout,
        } => ingest(config, &request_id, fail_fast, timeout).await?,
        Commands::Progress { request_id } => show_progress(config, &request_id).await?,
        Commands::Migrate => migrate(config).await?,
        Commands::Status => show_status(config).await?,
    }

    Ok(())
}

/// Opens the configured store
async fn open_store(config: &Config) -> Result<Arc<dyn MeasurementStore>> {
    match config.database_url {
        Some(ref url) => {
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database URL configured - measurements are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build_pipeline(config: &Config) -> Result<IngestionPipeline> {
    config.validate()?;

    let catalog = config.load_catalog().await?;
    let source: Arc<dyn WeatherSource> =
        Arc::new(OpenWeatherSource::new(config.open_weather_config()?)?);
    let store = open_store(config).await?;
    let pipeline_config = PipelineConfig::from_config(config)?;

    info!(
        cities = catalog.len(),
        rate_limit = config.rate_limit,
        period_secs = config.rate_limit_period_secs,
        policy = %pipeline_config.failure_policy,
        database = config.has_database(),
        "Configuration loaded"
    );

    Ok(IngestionPipeline::new(catalog, source, store, pipeline_config))
}

async fn serve(config: Config) -> Result<()> {
    let addr = config.listen_addr()?;
    let service = IngestionService::new(Arc::new(build_pipeline(&config).await?));
    let shutdown = CancellationToken::new();

    let server = tokio::spawn(api::serve(addr, service.clone(), shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    service.shutdown().await;
    match server.await {
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Weather ingestion service stopped");
    Ok(())
}

async fn ingest(
    mut config: Config,
    request_id: &str,
    fail_fast: bool,
    timeout: Option<std::time::Duration>,
) -> Result<()> {
    if fail_fast {
        config.failure_policy = FailurePolicy::FailFast.to_string();
    }
    if let Some(timeout) = timeout {
        config.set_request_timeout(timeout);
    }

    let pipeline = build_pipeline(&config).await?;
    let cancel = CancellationToken::new();

    let run = pipeline.run_with_cancel(request_id, cancel.clone());
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown_signal() => {
            cancel.cancel();
            run.await
        }
    };

    // Let fetches a fail-fast run left in flight finish their writes
    pipeline.detached().close();
    pipeline.detached().wait().await;

    let report = result?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!(
        "\n{} of {} cities stored in {}",
        report.succeeded,
        report.total_cities,
        humantime::format_duration(report.elapsed())
    );

    Ok(())
}

async fn show_progress(config: Config, request_id: &str) -> Result<()> {
    let pipeline = build_pipeline(&config).await?;
    let progress = weather_ingestion::progress::get_progress(
        pipeline.store().as_ref(),
        pipeline.catalog().len(),
        request_id,
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&progress)?);
    Ok(())
}

async fn migrate(config: Config) -> Result<()> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not configured"))?;

    let store = PgStore::connect(url, config.database_max_connections).await?;
    store.migrate().await?;
    println!("Migrations applied");
    Ok(())
}

async fn show_status(config: Config) -> Result<()> {
    println!("\nWeather Ingestion Service Status");
    println!("================================\n");

    println!("API URL:         {}", config.weather_api_url);
    println!(
        "API key:         {}",
        if config.weather_api_key.is_some() { "set (redacted)" } else { "missing" }
    );
    println!(
        "Rate limit:      {} per {}s",
        config.rate_limit, config.rate_limit_period_secs
    );
    println!(
        "Request timeout: {}",
        config
            .request_timeout()
            .map(|t| humantime::format_duration(t).to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("Failure policy:  {}", config.failure_policy);
    println!(
        "Storage:         {}",
        if config.has_database() { "postgres" } else { "memory" }
    );
    println!("Listen address:  {}", config.listen_addr);

    match config.load_catalog().await {
        Ok(catalog) => println!("Catalog:         {} cities", catalog.len()),
        Err(e) => println!("Catalog:         unavailable ({})", e),
    }

    if let Err(e) = config.validate() {
        println!("\nConfiguration invalid: {}", e);
    }

    Ok(())
}
