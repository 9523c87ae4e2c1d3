use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upload_gateway::config::ServiceConfig;
use upload_gateway::{
    start_api_server, AppState, Config, GeminiFilesClient, Relay, StorageSelector, SysinfoProbe,
    UploadReceiver,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        "Starting Upload Gateway"
    );

    // Initialize metrics
    init_metrics(&config.service)?;

    // Directory bootstrap
    let receiver = Arc::new(UploadReceiver::new(
        &config.server.uploads_dir,
        &config.storage,
    ));
    receiver
        .prepare()
        .await
        .context("Failed to create uploads directory")?;
    tokio::fs::create_dir_all(&config.server.public_dir)
        .await
        .context("Failed to create public directory")?;

    // Initialize components
    let selector = Arc::new(StorageSelector::new(
        Arc::new(SysinfoProbe::new()),
        &config.storage,
    ));

    let client = Arc::new(
        GeminiFilesClient::new(&config.relay).context("Failed to initialize Gemini Files client")?,
    );
    let relay = Arc::new(Relay::new(
        client,
        &config.server.uploads_dir,
        config.relay_timeout(),
    ));

    let state = AppState {
        selector,
        receiver,
        relay,
    };

    start_api_server(state, &config, shutdown_signal()).await?;

    info!("Upload gateway stopped");

    Ok(())
}

/// JSON logs filtered by `RUST_LOG`, falling back to the configured level
fn init_tracing(service: &ServiceConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_target(false))
        .init();
}

/// Expose gateway counters on their own port, tagged with the service name
fn init_metrics(service: &ServiceConfig) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .add_global_label("service", service.name.clone())
        .with_http_listener(([0, 0, 0, 0], service.metrics_port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = service.metrics_port, "Gateway metrics exporter listening");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM; in-flight uploads finish before the server exits
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
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
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };

    info!(signal = signal, "Draining in-flight uploads before shutdown");
}
