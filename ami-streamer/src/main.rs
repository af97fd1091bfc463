use std::{sync::Arc, time::Duration};

use ami_streamer::{
    config::AppConfig,
    control_api,
    generator::FleetResolver,
    jobs::JobManager,
    metrics_server,
    observability,
    registry::JobRegistry,
    session::{pg::PgSessionFactory, SessionProvider, Warehouse},
    sinks::SinkBuilder,
    storage::S3Connector,
};
use anyhow::Result;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    // Connects lazily on first use and reconnects when the token expires.
    let session = Arc::new(SessionProvider::new(PgSessionFactory::new(
        cfg.warehouse.uri.clone(),
        cfg.warehouse.token_path.clone(),
        cfg.warehouse.max_connections,
    )));
    let warehouse: Arc<dyn Warehouse> = session.clone();

    let connector = Arc::new(S3Connector::new(cfg.storage.region.clone(), cfg.storage.endpoint.clone()));
    let destinations = SinkBuilder::new(warehouse.clone(), connector, cfg.sink_settings());

    let manager = Arc::new(JobManager::new(
        JobRegistry::new(),
        FleetResolver::new(warehouse),
        Arc::new(destinations),
        cfg.streaming.delivery_backoff(),
    ));

    let result = tokio::select! {
        served = control_api::serve(&cfg.control.bind_addr, manager.clone()) => served,
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            signal.map_err(anyhow::Error::from)
        }
    };

    let stopping = manager.stop_all();
    tracing::info!(jobs = stopping, "requested stop for active jobs");
    if !manager.wait_idle(SHUTDOWN_GRACE).await {
        tracing::warn!(grace = ?SHUTDOWN_GRACE, "jobs still active at shutdown, closing session anyway");
    }
    session.close().await;

    result
}
