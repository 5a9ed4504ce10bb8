use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use yetis_common::config::ServerConfig;
use yetis_server::{file_logging, routes, Supervisor, YETIS_SERVER_PORT};

/// Daemon entrypoint (§4.G), grounded on the teacher's `main.rs` overall
/// shape (logging init, router assembly, `axum::serve` with graceful
/// shutdown) and `server/run.go:runWithGracefulShutDown` for the ordering:
/// cleanup actions run to completion before the HTTP listener is asked to
/// stop accepting, bounded by a 5s drain budget.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _file_log_guard = file_logging::init_logging(&log_level);

    let config_path = std::env::var("YETIS_CONFIG").ok();
    let config = match config_path {
        Some(path) => ServerConfig::read(&path)?,
        None => ServerConfig::default(),
    };

    let supervisor = Supervisor::new(config);
    let app = routes::router(supervisor.clone());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", YETIS_SERVER_PORT)).await?;
    info!(port = YETIS_SERVER_PORT, "yetisd listening");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let cleanup_supervisor = supervisor.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, cleaning up deployments and services");
        cleanup_supervisor.shutdown_gracefully().await;
        let _ = shutdown_tx.send(());
    });

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });

    match tokio::time::timeout(Duration::from_secs(5), serve).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "server exited with error"),
        Err(_) => warn!("server forced to shut down after 5s drain budget"),
    }

    info!("yetisd exiting");
    Ok(())
}

/// Interrupt and terminate both trigger graceful shutdown (§6); kill is
/// uncatchable and implies abandoned children, so it isn't handled here.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = async {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to install sigterm handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
