// main.rs
use lamp_actuator::{DeviceAgent, config::Settings, metrics::setup_metrics};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use validator::Validate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if settings.metrics.enabled {
        setup_metrics(settings.metrics.port)
            .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
        tracing::info!("Metrics exported on port {}", settings.metrics.port);
    }

    let agent = DeviceAgent::new(settings);
    let outcome = tokio::select! {
        result = agent.run() => result,
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
            Ok(())
        }
    };

    agent.shutdown().await;
    outcome.map_err(|e| anyhow::anyhow!("Lamp agent failed: {}", e))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
