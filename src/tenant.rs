use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::booking::BookingService;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// One booking service per tenant, each with its own engine, WAL and compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    services: DashMap<String, Arc<BookingService>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            services: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create the service for `tenant`, replaying its WAL.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<BookingService>> {
        if let Some(service) = self.services.get(tenant) {
            return Ok(service.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }

        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }

        if self.services.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }
        // The entry lock serialises two first connections to the same tenant.
        let entry = self.services.entry(tenant.to_string());
        if let Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path)?);
        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));

        let service = Arc::new(BookingService::standalone(engine));
        entry.or_insert(service.clone());
        tracing::info!("tenant {tenant:?} loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.services.len() as f64);
        Ok(service)
    }
}
