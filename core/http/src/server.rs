//! Server lifecycle: listener, periodic sweep and graceful shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::routes::{router, AppState};
use vaultgate_app::{AppConfig, BrowsingService};

/// Release expired sessions and stale rate limit records every `every`.
pub fn spawn_sweeper(service: Arc<BrowsingService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let service = service.clone();
            match tokio::task::spawn_blocking(move || service.sweep()).await {
                Ok(report) => debug!(
                    sessions = report.sessions_released,
                    rate_records = report.rate_records_pruned,
                    "Sweep finished"
                ),
                Err(e) => warn!(error = %e, "Sweep task failed"),
            }
        }
    })
}

/// Serve on `listener` until `shutdown` resolves, then close every session.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<BrowsingService>,
    cookie_secure: bool,
    sweep_every: Duration,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(AppState {
        service: service.clone(),
        cookie_secure,
    });
    let sweeper = spawn_sweeper(service.clone(), sweep_every);

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    sweeper.abort();
    let closed = tokio::task::spawn_blocking(move || service.shutdown())
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Session shutdown task failed");
            0
        });
    info!(sessions = closed, "Server stopped");
    result
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
pub async fn run(config: AppConfig) -> std::io::Result<()> {
    let service = Arc::new(BrowsingService::from_config(&config));
    let listener = TcpListener::bind(config.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        adapter = ?config.adapter,
        vaults = config.vaults.len(),
        "Listening"
    );
    serve(
        listener,
        service,
        config.cookie_secure,
        Duration::from_secs(config.sweep_interval_seconds),
        shutdown_signal(),
    )
    .await
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
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
