use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use salonslot::api::{self, AppState};
use salonslot::clock::{Clock, SystemClock};
use salonslot::config::Config;
use salonslot::coordinator::ReservationCoordinator;
use salonslot::notify::{LogNotifier, NotifyHub};
use salonslot::schedule::InMemorySchedules;
use salonslot::tenant::TenantManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    salonslot::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let schedules = match &config.schedule_file {
        Some(path) => InMemorySchedules::from_file(path)?,
        None => {
            tracing::warn!("SALONSLOT_SCHEDULE_FILE not set; every tenant lacks a schedule");
            InMemorySchedules::default()
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tenants = Arc::new(TenantManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
        clock.clone(),
    ));
    let notify = Arc::new(NotifyHub::new(Arc::new(LogNotifier)));
    let coordinator = Arc::new(ReservationCoordinator::new(
        tenants,
        Arc::new(schedules),
        notify,
        clock,
        config.coordinator_settings(),
    ));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("salonslot listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  timezone: {}", config.timezone);
    info!("  request_timeout: {}ms", config.request_timeout.as_millis());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received, draining requests");
    };

    api::serve(listener, AppState { coordinator }, shutdown).await?;

    info!("salonslot stopped");
    Ok(())
}
