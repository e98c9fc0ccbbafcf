use crate::namespace::{Namespaces, with_deadline};
use crate::record::{StoredRecord, VoidTime, now_ms};
use aerocache::{
    Bins, ReadPolicy, Record, RecordExistsAction, RecordKey, RecordMetadata, RecordStore,
    WritePolicy,
};
use async_trait::async_trait;
use shared::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sled-based durable record store.
///
/// Each namespace is a sled tree keyed by `set name || 0x00 || digest`, so a
/// set is a key prefix. Expired records are invisible to reads and are
/// purged by the supervisor tasks. Tree access runs on the blocking pool, so
/// a policy's total timeout bounds the whole operation.
pub struct SledRecordStore {
    db: sled::Db,
    namespaces: Namespaces,
    connected: AtomicBool,
}

/// What a read-modify-write step decided
enum Change<T> {
    Write(StoredRecord, T),
    Delete(T),
    Keep(T),
}

impl SledRecordStore {
    /// Open (or create) a store at `path`
    /// Creates the parent directory if it doesn't exist
    pub fn open(path: impl AsRef<Path>, namespaces: Namespaces) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open Sled database: {}", e)))?;

        Ok(Self::with_db(db, namespaces))
    }

    /// Store backed by a temporary database that is removed on drop
    pub fn temporary(namespaces: Namespaces) -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::Internal(format!("Failed to open Sled database: {}", e)))?;

        Ok(Self::with_db(db, namespaces))
    }

    fn with_db(db: sled::Db, namespaces: Namespaces) -> Self {
        Self {
            db,
            namespaces,
            connected: AtomicBool::new(false),
        }
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connection("client is not connected".to_string()))
        }
    }

    fn tree(&self, namespace: &str) -> Result<sled::Tree> {
        self.namespaces.get(namespace)?;
        self.db
            .open_tree(namespace)
            .map_err(|e| Error::Internal(format!("Failed to open namespace tree: {}", e)))
    }

    /// Connected check plus the namespace tree, ready to move onto the blocking pool
    fn prepare(&self, key: &RecordKey) -> Result<(sled::Tree, RecordKey)> {
        self.check_connected()?;
        Ok((self.tree(&key.namespace)?, key.clone()))
    }

    fn set_prefix(set_name: Option<&str>) -> Vec<u8> {
        let mut prefix = set_name.unwrap_or_default().as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    fn slot(key: &RecordKey) -> Vec<u8> {
        let mut slot = Self::set_prefix(key.set_name.as_deref());
        slot.extend_from_slice(&key.digest);
        slot
    }

    /// Runs blocking tree work off the runtime, bounded by `total_timeout`
    async fn blocking<T, F>(total_timeout: Option<Duration>, name: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        with_deadline(total_timeout, name, async move {
            tokio::task::spawn_blocking(op)
                .await
                .map_err(|e| Error::Internal(format!("Failed to run {}: {}", name, e)))?
        })
        .await
    }

    fn live(tree: &sled::Tree, key: &RecordKey) -> Result<StoredRecord> {
        let slot = Self::slot(key);

        let bytes = tree
            .get(&slot)
            .map_err(|e| Error::Internal(format!("Failed to read record: {}", e)))?
            .ok_or(Error::NotFound)?;
        let record = StoredRecord::from_bytes(&bytes)?;

        if record.is_live(now_ms()) {
            return Ok(record);
        }

        // lazily drop the expired record unless someone rewrote it meanwhile
        if let Err(e) = tree.compare_and_swap(&slot, Some(bytes), None as Option<&[u8]>) {
            warn!("Failed to drop expired record {:?}: {}", key, e);
        }
        Err(Error::NotFound)
    }

    /// Compare-and-swap loop over the live record at `key`
    fn update<T, F>(tree: &sled::Tree, key: &RecordKey, now: i64, mut step: F) -> Result<T>
    where
        F: FnMut(Option<StoredRecord>) -> Result<Change<T>>,
    {
        let slot = Self::slot(key);

        loop {
            let current_bytes = tree
                .get(&slot)
                .map_err(|e| Error::Internal(format!("Failed to read record: {}", e)))?;
            let current = match &current_bytes {
                Some(bytes) => Some(StoredRecord::from_bytes(bytes)?),
                None => None,
            }
            .filter(|r| r.is_live(now));

            let (next, out) = match step(current)? {
                Change::Write(record, out) => (Some(record.to_bytes()?), out),
                Change::Delete(out) => (None, out),
                Change::Keep(out) => return Ok(out),
            };

            match tree.compare_and_swap(&slot, current_bytes, next) {
                Ok(Ok(())) => return Ok(out),
                Ok(Err(_)) => debug!("Concurrent write on {:?}, retrying", key),
                Err(e) => {
                    return Err(Error::Internal(format!("Failed to write record: {}", e)));
                }
            }
        }
    }

    /// Remove every expired record of a namespace, returning how many were removed.
    /// Records that fail to decode are skipped.
    pub fn purge_expired(&self, namespace: &str) -> Result<usize> {
        let tree = self.tree(namespace)?;
        let now = now_ms();
        let mut purged = 0;

        for item in tree.iter() {
            let (slot, bytes) =
                item.map_err(|e| Error::Internal(format!("Failed to iterate namespace: {}", e)))?;
            let record = match StoredRecord::from_bytes(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping undecodable record in '{}': {}", namespace, e);
                    continue;
                }
            };
            if record.is_live(now) {
                continue;
            }
            let swapped = tree
                .compare_and_swap(&slot, Some(bytes), None as Option<&[u8]>)
                .map_err(|e| Error::Internal(format!("Failed to purge record: {}", e)))?;
            if swapped.is_ok() {
                purged += 1;
            }
        }

        Ok(purged)
    }

    /// Spawn one supervisor task per supervised namespace.
    /// Tasks stop once the store is dropped.
    pub fn spawn_supervisor(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.namespaces
            .iter()
            .filter_map(|config| config.nsup_period.map(|period| (config.name.clone(), period)))
            .map(|(namespace, period)| {
                let weak = Arc::downgrade(self);
                info!(
                    "Starting namespace supervisor for '{}' every {:?}",
                    namespace, period
                );

                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        let Some(store) = weak.upgrade() else {
                            debug!("Store dropped, stopping supervisor for '{}'", namespace);
                            break;
                        };
                        let ns = namespace.clone();
                        let pass =
                            tokio::task::spawn_blocking(move || store.purge_expired(&ns)).await;
                        match pass {
                            Ok(Ok(0)) => {}
                            Ok(Ok(n)) => {
                                debug!("Purged {} expired record(s) from '{}'", n, namespace)
                            }
                            Ok(Err(e)) => warn!("Supervisor pass on '{}' failed: {}", namespace, e),
                            Err(e) => warn!("Supervisor pass on '{}' panicked: {}", namespace, e),
                        }
                    }
                })
            })
            .collect()
    }

    /// Flush dirty buffers to disk
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::Internal(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SledRecordStore {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.flush() {
                warn!("Failed to flush on close: {}", e);
            }
        }
    }

    async fn get(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<Record> {
        let (tree, key) = self.prepare(key)?;
        Self::blocking(policy.total_timeout, "get", move || {
            Ok(Self::live(&tree, &key)?.to_record(now_ms()))
        })
        .await
    }

    async fn get_header(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<RecordMetadata> {
        let (tree, key) = self.prepare(key)?;
        Self::blocking(policy.total_timeout, "get_header", move || {
            Ok(Self::live(&tree, &key)?.meta(now_ms()))
        })
        .await
    }

    async fn exists(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<bool> {
        let (tree, key) = self.prepare(key)?;
        Self::blocking(policy.total_timeout, "exists", move || {
            match Self::live(&tree, &key) {
                Ok(_) => Ok(true),
                Err(Error::NotFound) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn put(&self, policy: &WritePolicy, key: &RecordKey, bins: Bins) -> Result<()> {
        let (tree, key) = self.prepare(key)?;
        let now = now_ms();
        let void = self.namespaces.resolve(&key.namespace, policy.expiration, now)?;
        let policy = *policy;

        Self::blocking(policy.total_timeout, "put", move || {
            Self::update(&tree, &key, now, |current| {
                if current.is_some() && policy.exists == RecordExistsAction::CreateOnly {
                    return Err(Error::RecordExists);
                }
                if void == VoidTime::Expired {
                    return Ok(if current.is_some() {
                        Change::Delete(())
                    } else {
                        Change::Keep(())
                    });
                }
                let mut record =
                    current.unwrap_or_else(|| StoredRecord::empty(&key, policy.send_key, now));
                record.replace_bins(bins.clone(), void, now);
                Ok(Change::Write(record, ()))
            })
        })
        .await
    }

    async fn add(
        &self,
        policy: &WritePolicy,
        key: &RecordKey,
        bin_name: &str,
        delta: i64,
    ) -> Result<i64> {
        let (tree, key) = self.prepare(key)?;
        let now = now_ms();
        let void = self.namespaces.resolve(&key.namespace, policy.expiration, now)?;
        let policy = *policy;
        let bin_name = bin_name.to_string();

        Self::blocking(policy.total_timeout, "add", move || {
            Self::update(&tree, &key, now, |current| {
                let mut record =
                    current.unwrap_or_else(|| StoredRecord::empty(&key, policy.send_key, now));
                let value = record.apply_add(&bin_name, delta)?;
                if void == VoidTime::Expired {
                    return Ok(Change::Delete(value));
                }
                record.touch(void, now);
                Ok(Change::Write(record, value))
            })
        })
        .await
    }

    async fn remove(&self, policy: &WritePolicy, key: &RecordKey) -> Result<()> {
        let (tree, key) = self.prepare(key)?;
        let now = now_ms();

        Self::blocking(policy.total_timeout, "remove", move || {
            Self::update(&tree, &key, now, |current| match current {
                Some(_) => Ok(Change::Delete(())),
                None => Err(Error::NotFound),
            })
        })
        .await
    }

    /// Prefix scan-and-delete. Not atomic: a write landing in the set while
    /// the scan runs may survive.
    async fn truncate(&self, namespace: &str, set_name: Option<&str>) -> Result<()> {
        self.check_connected()?;
        let tree = self.tree(namespace)?;
        let prefix = Self::set_prefix(set_name);

        let removed = Self::blocking(None, "truncate", move || {
            let mut removed = 0usize;
            for item in tree.scan_prefix(prefix) {
                let (slot, _) =
                    item.map_err(|e| Error::Internal(format!("Failed to scan set: {}", e)))?;
                tree.remove(slot)
                    .map_err(|e| Error::Internal(format!("Failed to truncate set: {}", e)))?;
                removed += 1;
            }
            Ok(removed)
        })
        .await?;

        info!(
            "Truncated {} record(s) from {}/{}",
            removed,
            namespace,
            set_name.unwrap_or("<null>")
        );
        Ok(())
    }
}

impl std::fmt::Debug for SledRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledRecordStore")
            .field("db", &"<sled::Db>")
            .field("connected", &self.is_connected())
            .finish()
    }
}
