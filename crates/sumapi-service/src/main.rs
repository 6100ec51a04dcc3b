//! Sum API HTTP microservice.
//!
//! This service exposes a single arithmetic endpoint behind the usual
//! operational surface: health probes, Prometheus metrics and structured
//! access logs.
//!
//! # Endpoints
//!
//! - `POST /api/v1/sum` - Sum between 2 and 100 numbers
//! - `GET /api/v1/sum` - Describe the sum endpoint
//! - `GET /healthz` - Full health check (path configurable)
//! - `GET /healthz/live` - Kubernetes liveness probe
//! - `GET /healthz/ready` - Kubernetes readiness probe
//! - `GET /metrics` - Prometheus metrics endpoint (path configurable)
//! - `GET /` - Service metadata
//!
//! # Configuration
//!
//! Read from the environment, after loading `.env` (or the file passed with
//! `--config`). See `sumapi_service_shared::config` for the full list.

mod router;
mod sum;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use sumapi_service_shared::{AppState, MetricsError, ServiceConfig, init_logging, init_metrics};

use crate::router::{SERVICE_NAME, build_router};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build commit, injected at compile time through `SUMAPI_BUILD_COMMIT`.
fn build_commit() -> &'static str {
    option_env!("SUMAPI_BUILD_COMMIT").unwrap_or("dev")
}

#[derive(Parser, Debug)]
#[command(
    author,
    about = "Sum API HTTP microservice",
    disable_version_flag = true
)]
struct Cli {
    /// Print version and build commit, then exit
    #[arg(short = 'V', long)]
    version: bool,

    /// Environment file to load instead of `.env`
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!(
            "{} version: {}, commit: {}",
            SERVICE_NAME,
            VERSION,
            build_commit()
        );
        return Ok(());
    }

    // Variables already set in the process environment take precedence.
    let env_file = match &cli.config {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?;
            Some(path.display().to_string())
        }
        None => dotenvy::dotenv().ok().map(|p| p.display().to_string()),
    };

    let config = ServiceConfig::from_env();
    init_logging(&config.logging);

    info!(
        version = VERSION,
        commit = build_commit(),
        environment = %config.server.environment,
        log_level = %config.logging.level,
        log_format = ?config.logging.format,
        env_file = env_file.as_deref().unwrap_or("none"),
        "Starting {}",
        SERVICE_NAME
    );

    if let Err(e) = config.validate() {
        // Keep serving; the readiness probe reports the problem.
        warn!(error = %e, "configuration is invalid");
    }

    let metrics = match init_metrics(&config.metrics, VERSION, &config.server.environment) {
        Ok(metrics) => Some(metrics),
        Err(MetricsError::Disabled) => {
            info!("metrics disabled");
            None
        }
        Err(e) => {
            warn!(error = %e, "failed to initialize metrics, continuing without metrics");
            None
        }
    };

    let bind_address = config.server.bind_address();
    let shutdown_timeout = config.server.shutdown_timeout;
    let state = AppState::new(config, VERSION, metrics);
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;

    info!(
        addr = %bind_address,
        environment = %state.config().server.environment,
        version = VERSION,
        "Server started successfully"
    );

    serve(listener, app, shutdown_timeout).await?;

    info!("{} shutdown completed", SERVICE_NAME);
    Ok(())
}

/// Serve until a shutdown signal arrives, then drain for at most `shutdown_timeout`.
async fn serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    shutdown_timeout: Duration,
) -> anyhow::Result<()> {
    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = signal_rx.await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            // The server stopped on its own, before any signal.
            let result = result.context("server task failed")?;
            return result.context("server error");
        }
        signal = shutdown_signal() => {
            info!(signal, "Shutdown signal received");
        }
    }

    let _ = signal_tx.send(());

    match tokio::time::timeout(shutdown_timeout, &mut server).await {
        Ok(result) => {
            let result = result.context("server task failed")?;
            result.context("server error")?;
            info!("Server stopped gracefully");
        }
        Err(_) => {
            error!(
                timeout = ?shutdown_timeout,
                "graceful shutdown timed out, abandoning in-flight requests"
            );
            server.abort();
        }
    }

    Ok(())
}

/// Resolve on SIGINT or SIGTERM (Ctrl-C only on non-Unix platforms).
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
