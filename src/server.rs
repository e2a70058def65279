use anyhow::Result;
use arc_swap::ArcSwap;
use axum::{routing::get, Router};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::Config,
    exposition::{Catalogue, ExpositionSettings},
    forward::{spawn_forwarder, ForwardSettings},
    handlers::{self, ExporterState},
    ingest::{spawn_ingest_task, Pipeline},
    metrics,
    patterns::PatternLibrary,
    probe::{spawn_probe_task, DeviceDirectory, DeviceProber, DirectoryRefresher, SharedDirectory},
    reaper::{spawn_reaper_task, ReaperConfig},
    signals::setup_signal_handlers,
    store::DeviceStore,
    syslog::SyslogListener,
};

/// Start the exporter
///
/// This function:
/// 1. Initializes self-metrics and compiles the pattern library
/// 2. Probes configured devices and sets up signal handlers
/// 3. Binds the syslog listener and spawns the ingest, reaper and probe tasks
/// 4. Serves the metrics endpoint until shutdown, then drains every task
pub async fn start_server(config: Config) -> Result<()> {
    info!("Initializing Prometheus metrics...");
    let metrics_handle = metrics::init_metrics()?;

    // Fail fast on a broken pattern table
    let library = Arc::new(PatternLibrary::compile()?);
    info!(patterns = library.len(), "Pattern library compiled");

    let store = Arc::new(DeviceStore::new());
    let http_client = reqwest::Client::new();

    let directory: SharedDirectory = Arc::new(ArcSwap::from_pointee(DeviceDirectory::default()));
    let refresher = if config.devices.is_empty() {
        None
    } else {
        let prober = DeviceProber::new(
            http_client.clone(),
            Duration::from_secs(config.probe.timeout_seconds),
        );
        let refresher = Arc::new(DirectoryRefresher::new(
            prober,
            config.devices.clone(),
            directory.clone(),
        ));
        refresher.refresh().await;
        Some(refresher)
    };

    // Setup signal handlers (SIGTERM, SIGINT for shutdown; SIGHUP for re-probe)
    let (shutdown_tx, signal_handle) = setup_signal_handlers(refresher.clone());

    let probe_handle = match &refresher {
        Some(refresher) if config.probe.interval_seconds > 0 => Some(spawn_probe_task(
            refresher.clone(),
            Duration::from_secs(config.probe.interval_seconds),
            shutdown_tx.subscribe(),
        )),
        _ => None,
    };

    let mut pipeline = Pipeline::new(library, store.clone());
    let mut forward_task = None;
    if config.forward.enabled {
        if let Some(url) = &config.forward.url {
            let (handle, task) = spawn_forwarder(
                http_client.clone(),
                ForwardSettings {
                    url: url.clone(),
                    timeout: Duration::from_secs(config.forward.timeout_seconds),
                    queue_capacity: config.forward.queue_capacity,
                    prefix: config.forward.prefix.clone(),
                },
            );
            pipeline = pipeline.with_forwarder(handle);
            forward_task = Some(task);
        }
    }

    let (tx, rx) = mpsc::channel(config.syslog.queue_capacity);
    let listener = SyslogListener::bind(&config.syslog.listen_address, tx).await?;
    let listener_handle = tokio::spawn(listener.run(shutdown_tx.subscribe()));
    let ingest_handle = spawn_ingest_task(pipeline, rx);
    let reaper_handle = spawn_reaper_task(
        store.clone(),
        ReaperConfig {
            ttl: config.syslog.ttl(),
            interval: config.syslog.reap_interval(),
        },
        shutdown_tx.subscribe(),
    );

    let state = ExporterState {
        store,
        catalogue: Arc::new(build_catalogue(&config)),
        directory,
        self_metrics: Some(metrics_handle),
    };
    let app = create_router(&config.server.metrics_path, state);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting syslog exporter on {}", addr);
    info!(
        "Configuration: syslog on {}, ttl {}s, {} probed devices, forwarding {}",
        config.syslog.listen_address,
        config.syslog.ttl_seconds,
        config.devices.len(),
        if forward_task.is_some() { "enabled" } else { "disabled" }
    );

    let tcp_listener = tokio::net::TcpListener::bind(addr).await?;

    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    // Listener first: dropping its sender lets the ingest task drain
    listener_handle.await?;
    ingest_handle.await?;
    reaper_handle.await?;
    if let Some(handle) = probe_handle {
        handle.await?;
    }
    // The pipeline held the last forward handle, so the queue is closed now
    if let Some(handle) = forward_task {
        handle.await?;
    }

    signal_handle.await?;
    info!("Exporter stopped gracefully");

    Ok(())
}

pub fn build_catalogue(config: &Config) -> Catalogue {
    Catalogue::new(ExpositionSettings {
        prefix: config.exposition.prefix.clone(),
        expose_unknown: config.exposition.expose_unknown,
        ttl: chrono::Duration::from_std(config.syslog.ttl()).unwrap_or(chrono::Duration::MAX),
    })
}

/// Create the Axum router with all routes and middleware
fn create_router(metrics_path: &str, state: ExporterState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(metrics_path, get(handlers::metrics_handler::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
