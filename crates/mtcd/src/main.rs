//! mtcd - MTConnect data collector daemon
//!
//! Finds MTConnect agents, keeps a session with each, caches what they
//! report, backs it up to SQLite and serves it over HTTP.
//!
//! Usage:
//!   mtcd [OPTIONS] [config.toml]
//!
//! Options:
//!   --triggers <dir>  Load trigger rule documents from a directory
//!
//! If no config file is provided, serves on port 8080 with no devices,
//! no discovery and an in-memory store.

use std::path::Path;
use std::sync::Arc;

use mtc_api::{router_for_prefix, AppState};
use mtc_cache::{BackupScheduler, EventFilterEngine, TelemetryCache};
use mtc_collector::{Collector, CollectorConfig};
use mtc_core::{DurableStore, MemoryStore};
use mtc_store::SqliteStore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PREFIX: &str = "http://+:8080/";

/// Parsed command-line arguments
struct Args {
    /// Collector config file (TOML)
    config_path: Option<String>,
    /// Trigger rule directory, overrides `[triggers] directory`
    triggers: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        triggers: None,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--triggers" | "-t" => {
                if i + 1 < args.len() {
                    result.triggers = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    tracing::error!("Missing argument for --triggers");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                tracing::warn!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"mtcd - MTConnect data collector daemon

Usage: mtcd [OPTIONS] [config.toml]

Options:
  -t, --triggers <dir>  Load trigger rule documents (*.yaml) from a directory
                        Buckets without a document keep the built-in rules
  -h, --help            Print this help message

Examples:
  # Serve on port 8080, nothing configured
  mtcd

  # Run with config file
  mtcd /etc/mtcd/collector.toml

  # Custom trigger rules
  mtcd --triggers /etc/mtcd/triggers/ collector.toml
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mtcd=info,mtc_collector=info,mtc_discovery=info,mtc_cache=info,mtc_api=info,mtc_store=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mtcd (MTConnect data collector)");

    let args = parse_args();

    let mut config = match args.config_path {
        Some(ref path) => {
            tracing::info!("Loading config from: {}", path);
            CollectorConfig::load(Path::new(path))?
        }
        None => {
            tracing::info!("No config file provided, using defaults");
            let mut config = CollectorConfig::default();
            config.server.prefixes.push(DEFAULT_PREFIX.to_string());
            config.validate()?;
            config
        }
    };
    if let Some(dir) = args.triggers {
        config.triggers.directory = Some(dir.into());
    }
    let listeners = config.server.listeners()?;

    let filter = match config.triggers.directory {
        Some(ref dir) => EventFilterEngine::load_dir(dir)?,
        None => EventFilterEngine::builtin()?,
    };

    let store: Arc<dyn DurableStore> = match config.backup.database {
        Some(ref path) => {
            tracing::info!("Opening database: {}", path.display());
            Arc::new(SqliteStore::open(path)?)
        }
        None => {
            tracing::warn!("No database configured, telemetry is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let cache = Arc::new(TelemetryCache::new(Arc::new(filter)));
    match cache.restore(store.as_ref()).await {
        Ok(count) => tracing::info!("Restored {} samples from the store", count),
        Err(e) => tracing::error!("Restoring from the store failed: {}", e),
    }

    let collector = Collector::new(&config, cache.clone(), store.clone());
    collector.start()?;

    let scheduler = BackupScheduler::new(cache.clone(), store, config.backup.schedule.clone());
    scheduler.start();

    // One listener per prefix
    let state = AppState::new(cache, collector.clone());
    let shutdown = CancellationToken::new();
    let mut servers = JoinSet::new();
    for prefix in listeners {
        let listener = tokio::net::TcpListener::bind(prefix.addr).await?;
        tracing::info!("Listening on http://{}{}/", listener.local_addr()?, prefix.path);

        let app = router_for_prefix(state.clone(), &prefix.path);
        let token = shutdown.clone();
        servers.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        });
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutdown requested");
        }
        Some(joined) = servers.join_next() => {
            tracing::error!("Listener exited: {:?}", joined);
        }
    }

    shutdown.cancel();
    collector.stop();
    scheduler.stop();

    match scheduler.run_once().await {
        Ok(report) => tracing::info!(
            samples_written = report.samples_written,
            samples_deleted = report.samples_deleted,
            "Final backup complete"
        ),
        Err(e) => tracing::error!("Final backup failed: {}", e),
    }

    while servers.join_next().await.is_some() {}
    tracing::info!("mtcd stopped");
    Ok(())
}
