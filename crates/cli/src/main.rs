//! Rota CLI - CRM sync, geocoding batches and the dashboard API.
//!
//! # Usage
//!
//! ```bash
//! # Import customers and deals from Ploomes
//! rota run-sync all
//!
//! # Geocode pending customers, 500 at most, continuing the last run
//! rota run-geocode --limit 500 --resume
//!
//! # Geocoding coverage
//! rota status
//!
//! # Put failed customers back in the queue
//! rota reset-failed
//!
//! # Serve the dashboard API
//! rota serve
//! ```
//!
//! Exit status is 0 on success and 1 on any error, including a geocoding
//! batch that was aborted or cancelled.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand, ValueEnum};
use rota_sync::config::SyncConfig;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CommandError;

#[derive(Parser)]
#[command(name = "rota")]
#[command(author, version, about = "Rota CRM sync and geocoding tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import records from the CRM
    RunSync {
        #[arg(value_enum, default_value_t = SyncTarget::All)]
        target: SyncTarget,
    },
    /// Geocode pending customers
    RunGeocode {
        /// Stop after this many customers
        #[arg(short, long)]
        limit: Option<usize>,

        /// Continue after the last checkpointed customer
        #[arg(short, long)]
        resume: bool,
    },
    /// Show geocoding coverage
    Status,
    /// Move every failed customer back to pending
    ResetFailed,
    /// Delete expired geocoding cache entries
    PurgeCache,
    /// Serve the dashboard API
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncTarget {
    Customers,
    Sales,
    All,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &SyncConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rota_sync=info,rota_cli=info,tower_http=info".into());

    // JSON on deployed hosts for structured log parsing, text locally
    let json = std::env::var("ROTA_LOG_JSON").is_ok() || std::env::var("FLY_APP_NAME").is_ok();
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing();

    // The Sentry layer resolves the hub per event, so a late init still reports
    let config = SyncConfig::from_env();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: SyncConfig) -> Result<(), CommandError> {
    match cli.command {
        Commands::RunSync { target } => match target {
            SyncTarget::Customers => commands::sync::customers(&config).await?,
            SyncTarget::Sales => commands::sync::sales(&config).await?,
            SyncTarget::All => {
                commands::sync::customers(&config).await?;
                commands::sync::sales(&config).await?;
            }
        },
        Commands::RunGeocode { limit, resume } => {
            commands::geocode::run(&config, limit, resume).await?;
        }
        Commands::Status => commands::status::show(&config).await?,
        Commands::ResetFailed => commands::maintenance::reset_failed(&config).await?,
        Commands::PurgeCache => commands::maintenance::purge_cache(&config).await?,
        Commands::Serve => commands::serve::run(&config).await?,
    }
    Ok(())
}
