//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::service::ReflectService;

use super::routes::routes;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Period of the identity cache sweep.
    pub sweep_interval: Duration,
    /// Idle time after which an unreferenced handle may be evicted.
    pub handle_ttl: Duration,
    /// If true, ignore SIGTERM and wait for explicit /shutdown or SIGINT.
    pub await_explicit_shutdown: bool,
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or(default)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            sweep_interval: env_secs("REFLECT_SWEEP_INTERVAL", Duration::from_secs(30)),
            handle_ttl: env_secs("REFLECT_HANDLE_TTL", Duration::from_secs(60)),
            await_explicit_shutdown: false,
        }
    }
}

/// Start the HTTP server with provided service.
pub async fn serve(config: ServerConfig, service: Arc<ReflectService>) -> anyhow::Result<()> {
    anyhow::ensure!(
        !config.sweep_interval.is_zero(),
        "sweep interval must be positive"
    );

    let shutdown_rx = service.shutdown_rx();
    let app = routes(service.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Starting remote-reflect server on {}", actual_addr);

    let sweeper = spawn_sweeper(service.clone(), config.sweep_interval, shutdown_rx.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.await_explicit_shutdown, shutdown_rx))
        .await?;

    info!("Server shutdown complete");

    // Stop the sweeper even when shutdown came from a signal.
    service.trigger_shutdown();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Sweep task ended abnormally");
    }

    Ok(())
}

/// Periodically evict idle, unreferenced handles until shutdown.
fn spawn_sweeper(
    service: Arc<ReflectService>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = service.sweep();
                    if evicted > 0 {
                        info!(
                            evicted,
                            remaining = service.executor().cache().len(),
                            "Swept idle handles"
                        );
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Sweep task stopped");
    })
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or /shutdown endpoint).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when the
/// tokio runtime is misconfigured.
async fn shutdown_signal(await_explicit_shutdown: bool, mut shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        if await_explicit_shutdown {
            tracing::info!("await_explicit_shutdown enabled, ignoring SIGTERM");
            std::future::pending::<()>().await
        } else {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect(
                    "failed to install SIGTERM handler - is tokio runtime configured correctly?",
                )
                .recv()
                .await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let explicit_shutdown = async {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = explicit_shutdown => {
            info!("Shutdown requested via /shutdown endpoint...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ClassLoader, Value};

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
        assert!(!config.await_explicit_shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_idle_handles_and_stops_on_shutdown() {
        let service = Arc::new(ReflectService::new(
            Arc::new(ClassLoader::new()),
            Duration::from_secs(1),
        ));
        let cache = service.executor().cache().clone();
        cache.cache_key(&Value::array(Vec::new())).unwrap();
        assert_eq!(cache.len(), 1);

        let sweeper = spawn_sweeper(service.clone(), Duration::from_secs(2), service.shutdown_rx());

        // The cache measures idle time on the std clock.
        std::thread::sleep(Duration::from_millis(1100));
        tokio::time::advance(Duration::from_secs(3)).await;
        for _ in 0..10 {
            if cache.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(cache.is_empty());

        service.trigger_shutdown();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn serve_rejects_zero_sweep_interval() {
        let service = Arc::new(ReflectService::new(
            Arc::new(ClassLoader::new()),
            Duration::from_secs(1),
        ));
        let config = ServerConfig {
            sweep_interval: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(serve(config, service).await.is_err());
    }
}
