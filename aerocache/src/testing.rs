// In-memory record store with fault injection for adapter tests

use crate::domain::policy::{ReadPolicy, RecordExistsAction, WritePolicy};
use crate::domain::{Bin, Bins, Expiration, Record, RecordKey, RecordMetadata};
use crate::ports::{RecordStore, StoreConnector};
use async_trait::async_trait;
use shared::config::Host;
use shared::{Error, Result};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fault {
    NsupDisabled,
    Disconnected,
    TruncateForbidden,
}

struct MockRecord {
    set_name: Option<String>,
    bins: Bins,
    generation: u32,
    expiration: Expiration,
}

impl MockRecord {
    fn meta(&self) -> RecordMetadata {
        RecordMetadata {
            generation: self.generation,
            ttl: match self.expiration {
                Expiration::Seconds(s) => Some(s),
                _ => None,
            },
        }
    }
}

pub(crate) struct MockStore {
    records: Mutex<HashMap<(String, [u8; RecordKey::DIGEST_LEN]), MockRecord>>,
    expirations: Mutex<HashMap<String, Expiration>>,
    faults: Mutex<Vec<Fault>>,
    connected: AtomicBool,
}

impl MockStore {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            expirations: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub(crate) async fn inject(&self, fault: Fault) {
        if fault == Fault::Disconnected {
            self.connected.store(false, Ordering::SeqCst);
        }
        self.faults.lock().await.push(fault);
    }

    /// Expiration of the most recent write for a user key
    pub(crate) async fn last_expiration(&self, user_key: &str) -> Option<Expiration> {
        self.expirations.lock().await.get(user_key).copied()
    }

    async fn has_fault(&self, fault: Fault) -> bool {
        self.faults.lock().await.contains(&fault)
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connection("client is not connected".to_string()))
        }
    }

    async fn check_expiration(&self, expiration: Expiration) -> Result<()> {
        if matches!(expiration, Expiration::Seconds(_)) && self.has_fault(Fault::NsupDisabled).await
        {
            return Err(Error::Forbidden(
                "TTL rejected, nsup-period is zero".to_string(),
            ));
        }
        Ok(())
    }

    fn slot(key: &RecordKey) -> (String, [u8; RecordKey::DIGEST_LEN]) {
        (key.namespace.clone(), key.digest)
    }
}

#[async_trait]
impl RecordStore for MockStore {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn get(&self, _policy: &ReadPolicy, key: &RecordKey) -> Result<Record> {
        self.check_connected()?;
        let records = self.records.lock().await;
        let record = records.get(&Self::slot(key)).ok_or(Error::NotFound)?;
        Ok(Record {
            meta: record.meta(),
            bins: record.bins.clone(),
        })
    }

    async fn get_header(&self, _policy: &ReadPolicy, key: &RecordKey) -> Result<RecordMetadata> {
        self.check_connected()?;
        let records = self.records.lock().await;
        records
            .get(&Self::slot(key))
            .map(MockRecord::meta)
            .ok_or(Error::NotFound)
    }

    async fn exists(&self, _policy: &ReadPolicy, key: &RecordKey) -> Result<bool> {
        self.check_connected()?;
        Ok(self.records.lock().await.contains_key(&Self::slot(key)))
    }

    async fn put(&self, policy: &WritePolicy, key: &RecordKey, bins: Bins) -> Result<()> {
        self.check_connected()?;
        self.check_expiration(policy.expiration).await?;

        let mut records = self.records.lock().await;
        let slot = Self::slot(key);
        let existing = records.get(&slot);
        if policy.exists == RecordExistsAction::CreateOnly && existing.is_some() {
            return Err(Error::RecordExists);
        }
        let generation = existing.map_or(0, |r| r.generation) + 1;

        self.expirations
            .lock()
            .await
            .insert(key.user_key.clone(), policy.expiration);

        if policy.expiration == Expiration::Expired {
            records.remove(&slot);
            return Ok(());
        }

        records.insert(
            slot,
            MockRecord {
                set_name: key.set_name.clone(),
                bins,
                generation,
                expiration: policy.expiration,
            },
        );
        Ok(())
    }

    async fn add(
        &self,
        policy: &WritePolicy,
        key: &RecordKey,
        bin_name: &str,
        delta: i64,
    ) -> Result<i64> {
        self.check_connected()?;
        self.check_expiration(policy.expiration).await?;

        let mut records = self.records.lock().await;
        let record = records.entry(Self::slot(key)).or_insert_with(|| MockRecord {
            set_name: key.set_name.clone(),
            bins: Bins::new(),
            generation: 0,
            expiration: policy.expiration,
        });

        let current = match record.bins.get(bin_name) {
            None => 0,
            Some(Bin::Int(i)) => *i,
            Some(other) => {
                return Err(Error::BinIncompatibleType(format!(
                    "bin '{}' holds {:?}",
                    bin_name, other
                )));
            }
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| Error::BinIncompatibleType("integer overflow".to_string()))?;

        record.bins.insert(bin_name.to_string(), Bin::Int(next));
        record.generation += 1;
        record.expiration = policy.expiration;
        Ok(next)
    }

    async fn remove(&self, _policy: &WritePolicy, key: &RecordKey) -> Result<()> {
        self.check_connected()?;
        self.records
            .lock()
            .await
            .remove(&Self::slot(key))
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    async fn truncate(&self, namespace: &str, set_name: Option<&str>) -> Result<()> {
        self.check_connected()?;
        if self.has_fault(Fault::TruncateForbidden).await {
            return Err(Error::Forbidden("truncate requires sys-admin".to_string()));
        }
        self.records
            .lock()
            .await
            .retain(|(ns, _), r| ns != namespace || r.set_name.as_deref() != set_name);
        Ok(())
    }
}

/// Hands out a fresh `MockStore` per connect call
#[derive(Default)]
pub(crate) struct MockConnector {
    connections: AtomicUsize,
    last: StdMutex<Option<Arc<MockStore>>>,
}

impl MockConnector {
    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn last_store(&self) -> Option<Arc<MockStore>> {
        self.last.lock().ok()?.clone()
    }
}

#[async_trait]
impl StoreConnector for MockConnector {
    async fn connect(&self, _hosts: &[Host]) -> Result<Arc<dyn RecordStore>> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let store = Arc::new(MockStore::new());
        if let Ok(mut last) = self.last.lock() {
            *last = Some(store.clone());
        }
        Ok(store)
    }
}

/// Collects formatted tracing output for the current thread
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<StdMutex<Vec<u8>>>);

impl CapturedLogs {
    /// Routes events to this buffer until the guard is dropped
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let logs = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || logs.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contents(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut logs) = self.0.lock() {
            logs.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
