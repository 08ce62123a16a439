//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::service::AdmissionService;

use super::routes::routes;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Start workers, serve until a shutdown signal, then drain the engine.
pub async fn serve(config: ServerConfig, service: Arc<AdmissionService>) -> anyhow::Result<()> {
    let app = routes(Arc::clone(&service));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    service.start().await;
    info!("Starting triage server on {}", actual_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(stop_accepting(Arc::clone(&service)))
        .await?;

    info!("HTTP listener closed");

    service.shutdown().await;

    Ok(())
}

/// What ended the serving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownCause {
    Interrupt,
    Terminate,
    Requested,
}

impl ShutdownCause {
    fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Requested => "/shutdown",
        }
    }
}

/// Resolves when the listener should stop, after logging what the engine
/// still has to drain.
async fn stop_accepting(service: Arc<AdmissionService>) {
    let cause = shutdown_cause(service.shutdown_rx()).await;
    let snapshot = service.health().await;
    info!(
        cause = cause.as_str(),
        queued = snapshot.queue_depth,
        pending_waiters = snapshot.pending_waiters,
        drain_timeout = ?service.config().drain_timeout,
        "Shutting down, draining admission queue"
    );
}

async fn shutdown_cause(mut shutdown_rx: watch::Receiver<bool>) -> ShutdownCause {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let requested = async {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => ShutdownCause::Interrupt,
        _ = terminate => ShutdownCause::Terminate,
        _ = requested => ShutdownCause::Requested,
    }
}
