use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    utc_offset_min: i64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, utc_offset_min: i64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            utc_offset_min,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let wal_path = self.data_dir.join(format!("{}.wal", wal_file_stem(tenant)?));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify, self.utc_offset_min)?);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// Map a tenant name to a WAL filename. The database startup parameter is
/// client-controlled, so everything outside [A-Za-z0-9_-] is stripped to keep
/// the name from escaping the data directory.
fn wal_file_stem(tenant: &str) -> std::io::Result<String> {
    let stem: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if stem.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty tenant name",
        ));
    }
    Ok(stem)
}
