//! ADF Logs server binary

use adf_logs::api::{create_router, ApiState};
use adf_logs::provider;
use adf_logs::{AppConfig, Diagnoser};
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "adf-logs-server", version, about = "Serve the ADF log analyzer over HTTP")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "ADF_LOGS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address from the config
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,tower_http=debug")),
        )
        .init();

    info!("Starting ADF Logs server v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!(
        config_path = ?args.config,
        provider = config.provider.provider_type,
        model = config.provider.model,
        "Loaded configuration"
    );

    // Other tabs keep working without a provider; only diagnosis is refused.
    let diagnoser = match provider::from_config(&config.provider) {
        Ok(provider) => {
            let health = provider.health_check().await;
            if health.healthy {
                info!(
                    provider = provider.name(),
                    model = provider.model(),
                    latency_ms = ?health.latency_ms,
                    "LLM provider ready"
                );
            } else {
                warn!(
                    provider = provider.name(),
                    error = ?health.error,
                    "LLM provider not reachable yet, diagnosis may fail"
                );
            }
            Some(Diagnoser::new(provider, config.diagnosis.clone()))
        }
        Err(e) => {
            warn!(error = %e, "LLM provider unavailable, diagnosis disabled");
            None
        }
    };

    let state = Arc::new(ApiState::new(
        diagnoser,
        config.columns.clone(),
        config.dashboard.top_failing,
    ));
    Arc::clone(&state.sessions).start_eviction_task(
        Duration::from_secs(config.server.session_idle_secs),
        Duration::from_secs(config.server.session_sweep_secs.max(1)),
    );
    let app = create_router(state);

    let bind = args.bind.unwrap_or(config.server.bind);
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind))?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
