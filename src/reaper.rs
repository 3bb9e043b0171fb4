use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const LOCK_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that compacts the tenant's WAL once enough appends pile up.
/// Exits when the engine is dropped.
pub async fn run_compactor(engine: Weak<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let Some(engine) = engine.upgrade() else { break };
        compact_if_due(&engine, threshold).await;
    }
}

/// Compact if more than `threshold` appends accumulated. Returns whether it ran.
pub async fn compact_if_due(engine: &Arc<Engine>, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(tenant = engine.tenant(), appends, "compacted WAL");
            true
        }
        Err(e) => {
            warn!(tenant = engine.tenant(), "WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that drops idle slot turns the release path missed.
pub async fn run_lock_sweeper(engine: Weak<Engine>) {
    let mut interval = tokio::time::interval(LOCK_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let Some(engine) = engine.upgrade() else { break };
        sweep_once(&engine);
    }
}

pub fn sweep_once(engine: &Engine) -> usize {
    let removed = engine.locks.sweep_idle();
    if removed > 0 {
        debug!(tenant = engine.tenant(), removed, "swept idle slot turns");
    }
    metrics::gauge!(crate::observability::SLOT_TURNS_ACTIVE, "tenant" => engine.tenant().to_string())
        .set(engine.locks.len() as f64);
    removed
}
