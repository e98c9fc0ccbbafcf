use crate::namespace::Namespaces;
use crate::sled_store::SledRecordStore;
use aerocache::{RecordStore, StoreConnector};
use async_trait::async_trait;
use shared::config::Host;
use shared::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Resolves a seed host to an embedded sled node under `data_dir`.
///
/// Each `host:port` gets its own database directory, so two caches
/// configured with the same seed share their records.
pub struct SledConnector {
    data_dir: PathBuf,
    namespaces: Namespaces,
}

impl SledConnector {
    pub fn new(data_dir: impl Into<PathBuf>, namespaces: Namespaces) -> Self {
        Self {
            data_dir: data_dir.into(),
            namespaces,
        }
    }

    pub fn node_path(&self, host: &Host) -> PathBuf {
        self.data_dir.join(format!("{}_{}", host.name, host.port))
    }
}

#[async_trait]
impl StoreConnector for SledConnector {
    async fn connect(&self, hosts: &[Host]) -> Result<Arc<dyn RecordStore>> {
        let seed = hosts
            .first()
            .ok_or_else(|| Error::Config("host list is empty".to_string()))?;
        let path = self.node_path(seed);

        info!("Opening embedded node for {}:{} at {:?}", seed.name, seed.port, path);
        let store = Arc::new(SledRecordStore::open(&path, self.namespaces.clone())?);
        store.spawn_supervisor();

        Ok(store)
    }
}
