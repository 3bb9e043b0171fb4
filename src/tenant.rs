use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::clock::Clock;
use crate::engine::Engine;
use crate::limits::*;
use crate::reaper;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// background compactor and slot-turn sweeper.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    /// Engines loaded or being opened; reserved before the WAL is touched.
    loaded: AtomicUsize,
    max_tenants: usize,
    data_dir: PathBuf,
    compact_threshold: u64,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
pub enum TenantError {
    InvalidName(&'static str),
    /// The process already holds its maximum number of tenants.
    AtCapacity,
    Io(io::Error),
}

impl fmt::Display for TenantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantError::InvalidName(why) => write!(f, "invalid tenant name: {why}"),
            TenantError::AtCapacity => write!(f, "tenant limit reached"),
            TenantError::Io(e) => write!(f, "tenant storage: {e}"),
        }
    }
}

impl std::error::Error for TenantError {}

impl From<io::Error> for TenantError {
    fn from(e: io::Error) -> Self {
        TenantError::Io(e)
    }
}

/// Reduce a tenant name to the characters allowed in a WAL file name.
pub fn sanitize_tenant(tenant: &str) -> Result<String, TenantError> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(TenantError::InvalidName("too long"));
    }
    // Prevent path traversal
    let safe_name: String = tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err(TenantError::InvalidName("empty"));
    }
    Ok(safe_name)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            engines: DashMap::new(),
            loaded: AtomicUsize::new(0),
            max_tenants: MAX_TENANTS,
            data_dir,
            compact_threshold,
            clock,
        }
    }

    pub fn with_max_tenants(mut self, max_tenants: usize) -> Self {
        self.max_tenants = max_tenants;
        self
    }

    fn wal_path(&self, safe_name: &str) -> PathBuf {
        self.data_dir.join(format!("{safe_name}.wal"))
    }

    /// Engine for a tenant that already has state, loading it from disk if
    /// needed. Never creates a WAL: `None` means the tenant has no bookings.
    pub fn get_existing(&self, tenant: &str) -> Result<Option<Arc<Engine>>, TenantError> {
        let safe_name = sanitize_tenant(tenant)?;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(Some(engine.value().clone()));
        }
        if !self.wal_path(&safe_name).exists() {
            return Ok(None);
        }
        self.get_or_create(tenant).map(Some)
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> Result<Arc<Engine>, TenantError> {
        let safe_name = sanitize_tenant(tenant)?;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.loaded.load(Ordering::Acquire) >= self.max_tenants {
            return Err(TenantError::AtCapacity);
        }

        // The entry guard keeps a concurrent first request from opening the
        // same WAL twice. The cap is claimed inside it, so racing first
        // requests for different tenants cannot overshoot.
        let engine = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                if self.loaded.fetch_add(1, Ordering::AcqRel) >= self.max_tenants {
                    self.loaded.fetch_sub(1, Ordering::AcqRel);
                    return Err(TenantError::AtCapacity);
                }
                let opened = Engine::new(safe_name.clone(), self.wal_path(&safe_name), self.clock.clone());
                let engine = match opened {
                    Ok(engine) => Arc::new(engine),
                    Err(e) => {
                        self.loaded.fetch_sub(1, Ordering::AcqRel);
                        return Err(e.into());
                    }
                };
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(reaper::run_compactor(Arc::downgrade(&engine), self.compact_threshold));
        tokio::spawn(reaper::run_lock_sweeper(Arc::downgrade(&engine)));

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(tenant = %safe_name, records = engine.store.record_count(), "tenant loaded");
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
