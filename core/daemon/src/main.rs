//! formtrace daemon entrypoint.
//!
//! Loads config, wires the session store, ingestion and reporter together, and
//! serves the client endpoints until Ctrl-C or SIGTERM.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use formtrace_daemon::config::{self, Config};
use formtrace_daemon::ingest::Ingestor;
use formtrace_daemon::report::{run_reporter, ChangeFeed};
use formtrace_daemon::server::{build_app, AppState};
use formtrace_daemon::store::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "formtrace-daemon")]
#[command(about = "Collects form-visit telemetry sessions over HTTP")]
#[command(version)]
struct Args {
    /// Path to configuration file (defaults to ~/.formtrace/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of static client assets (overrides config file)
    #[arg(long, value_name = "DIR")]
    client_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "formtrace daemon failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config::load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) if args.config.is_some() => return Err(err.into()),
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            Config::default()
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(client_dir) = args.client_dir {
        config.server.client_dir = client_dir;
    }

    let feed = ChangeFeed::new(config.report.change_buffer);
    let reporter = tokio::spawn(run_reporter(feed.subscribe(), tokio::io::stdout()));

    let store = Arc::new(SessionStore::new());
    let ingest = Arc::new(Ingestor::new(
        store,
        feed,
        config.ingest.paste_policy,
    ));
    info!(
        paste_policy = config.ingest.paste_policy.as_str(),
        change_buffer = config.report.change_buffer,
        "Ingestion configured"
    );

    let app = build_app(
        AppState {
            ingest: Arc::clone(&ingest),
        },
        &config.server.client_dir,
    );

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %addr,
        client_dir = %config.server.client_dir.display(),
        "formtrace daemon started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the remaining clones of the feed; dropping ours lets
    // the reporter drain and exit.
    drop(ingest);
    if let Err(err) = reporter.await {
        warn!(error = %err, "Session reporter task ended abnormally");
    }
    info!("formtrace daemon stopped");
    Ok(())
}

fn init_logging() {
    let debug_enabled = env::var("FORMTRACE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
