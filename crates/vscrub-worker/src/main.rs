//! Worker pool binary: runs agents and the pool controller in one process.

use std::net::SocketAddr;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vscrub_worker::{interrupt_channel, Backends, ControllerConfig, WorkerConfig, WorkerRuntime};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialise logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        error!("Worker exited with error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
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
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    info!("Starting vscrub-worker");

    let worker_config = WorkerConfig::from_env();
    let controller_config = ControllerConfig::from_env();
    info!("Worker config: {:?}", worker_config);
    info!("Controller config: {:?}", controller_config);

    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9090);
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], metrics_port)))
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics on port {}", metrics_port);

    let backends = Backends::from_env().context("Failed to create backends")?;
    let shutdown_timeout = worker_config.shutdown_timeout;

    let (interrupt, signal) = interrupt_channel();
    let runtime = WorkerRuntime::new(&backends, worker_config, controller_config, signal);
    let pool = runtime.pool.clone();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let controller = tokio::spawn(runtime.controller.run(shutdown_rx));

    shutdown_signal().await;
    info!("Pre-emption notice received, draining workers");
    interrupt.raise();
    shutdown_tx.send_replace(true);

    pool.drain(shutdown_timeout).await;
    if let Err(e) = controller.await {
        warn!("Pool controller task failed: {}", e);
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// SIGINT or SIGTERM; both count as a pre-emption notice.
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
}
