//! Axum API server binary.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vscrub_api::{create_router, metrics, ApiConfig, AppState};
use vscrub_worker::{
    interrupt_channel, Backends, ControllerConfig, StoreBackend, WorkerConfig, WorkerRuntime,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialise logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        error!("API server exited with error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vscrub=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    info!("Starting vscrub-api");

    let config = ApiConfig::from_env();
    info!("API config: bind={}", config.bind_addr());

    let worker_config = WorkerConfig::from_env();
    let backends = Backends::from_env().context("Failed to create backends")?;
    let state = AppState::new(config.clone(), &backends, &worker_config);

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    // An in-memory queue is only visible to this process, so it needs
    // workers here too.
    let (interrupt, signal) = interrupt_channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let embedded = if config.embedded_workers || backends.kind == StoreBackend::Memory {
        let shutdown_timeout = worker_config.shutdown_timeout;
        let runtime = WorkerRuntime::new(&backends, worker_config, ControllerConfig::from_env(), signal);
        let pool = runtime.pool.clone();
        let controller = tokio::spawn(runtime.controller.run(shutdown_rx));
        info!("Running embedded worker pool");
        Some((pool, controller, shutdown_timeout))
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some((pool, controller, shutdown_timeout)) = embedded {
        interrupt.raise();
        shutdown_tx.send_replace(true);
        pool.drain(shutdown_timeout).await;
        if let Err(e) = controller.await {
            warn!("Pool controller task failed: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for CTRL+C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}
