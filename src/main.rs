use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use turnaround_ops::{api, config::OpsConfig};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OpsConfig::from_env().context("failed to load configuration")?;
    let port = config.port;
    tracing::info!(
        gates = config.gates.len(),
        roster = config.diverted_roster.len(),
        bowsers = config.bowser_count,
        "configuration loaded"
    );

    let state = api::AppState::new(config);
    let seeded = state
        .service
        .seed(Utc::now())
        .context("failed to load seed flights")?;
    tracing::info!(seeded, "seed flights loaded");

    let app = api::router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
