use crate::namespace::{Namespaces, with_deadline};
use crate::record::{StoredRecord, VoidTime, now_ms};
use aerocache::{
    Bins, ReadPolicy, Record, RecordExistsAction, RecordKey, RecordMetadata, RecordStore,
    WritePolicy,
};
use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::Op;
use shared::{Error, Result};
use std::fmt::Debug;
use std::future::ready;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

type Slot = (String, [u8; RecordKey::DIGEST_LEN]);

/// Per-entry expiry driven by the record's void time
struct VoidTimeExpiry;

impl Expiry<Slot, StoredRecord> for VoidTimeExpiry {
    fn expire_after_create(
        &self,
        _key: &Slot,
        value: &StoredRecord,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.time_to_live(now_ms())
    }

    fn expire_after_update(
        &self,
        _key: &Slot,
        value: &StoredRecord,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.time_to_live(now_ms())
    }
}

/// Moka-based in-memory record store.
/// Expiry is enforced by moka itself, so TTLs never outlive their void time.
pub struct MokaRecordStore {
    cache: Cache<Slot, StoredRecord>,
    namespaces: Namespaces,
    connected: AtomicBool,
}

impl MokaRecordStore {
    /// Create an unbounded store serving the given namespaces
    pub fn new(namespaces: Namespaces) -> Self {
        Self::build(namespaces, None)
    }

    /// Create a store holding at most `max_records` records
    pub fn new_bounded(namespaces: Namespaces, max_records: u64) -> Self {
        Self::build(namespaces, Some(max_records))
    }

    fn build(namespaces: Namespaces, max_records: Option<u64>) -> Self {
        let mut builder = Cache::builder()
            .name("moka-record-store")
            .expire_after(VoidTimeExpiry);

        if let Some(capacity) = max_records {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
            namespaces,
            connected: AtomicBool::new(false),
        }
    }

    fn slot(key: &RecordKey) -> Slot {
        (key.namespace.clone(), key.digest)
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connection("client is not connected".to_string()))
        }
    }

    async fn live(&self, key: &RecordKey) -> Result<StoredRecord> {
        self.check_connected()?;
        self.namespaces.get(&key.namespace)?;

        let now = now_ms();
        self.cache
            .get(&Self::slot(key))
            .await
            .filter(|r| r.is_live(now))
            .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl RecordStore for MokaRecordStore {
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

    async fn get(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<Record> {
        with_deadline(policy.total_timeout, "get", async {
            let record = self.live(key).await?;
            Ok(record.to_record(now_ms()))
        })
        .await
    }

    async fn get_header(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<RecordMetadata> {
        with_deadline(policy.total_timeout, "get_header", async {
            let record = self.live(key).await?;
            Ok(record.meta(now_ms()))
        })
        .await
    }

    async fn exists(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<bool> {
        with_deadline(policy.total_timeout, "exists", async {
            match self.live(key).await {
                Ok(_) => Ok(true),
                Err(Error::NotFound) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn put(&self, policy: &WritePolicy, key: &RecordKey, bins: Bins) -> Result<()> {
        self.check_connected()?;
        let now = now_ms();
        let void = self.namespaces.resolve(&key.namespace, policy.expiration, now)?;

        with_deadline(policy.total_timeout, "put", async {
            let mut result = Ok(());
            self.cache
                .entry(Self::slot(key))
                .and_compute_with(|current| {
                    let current = current.map(|e| e.into_value()).filter(|r| r.is_live(now));
                    let op = match current {
                        Some(_) if policy.exists == RecordExistsAction::CreateOnly => {
                            result = Err(Error::RecordExists);
                            Op::Nop
                        }
                        _ if void == VoidTime::Expired => Op::Remove,
                        current => {
                            let mut record = current
                                .unwrap_or_else(|| StoredRecord::empty(key, policy.send_key, now));
                            record.replace_bins(bins, void, now);
                            Op::Put(record)
                        }
                    };
                    ready(op)
                })
                .await;
            result
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
        self.check_connected()?;
        let now = now_ms();
        let void = self.namespaces.resolve(&key.namespace, policy.expiration, now)?;

        with_deadline(policy.total_timeout, "add", async {
            let mut result = Err(Error::Internal("increment was not applied".to_string()));
            self.cache
                .entry(Self::slot(key))
                .and_compute_with(|current| {
                    let mut record = current
                        .map(|e| e.into_value())
                        .filter(|r| r.is_live(now))
                        .unwrap_or_else(|| StoredRecord::empty(key, policy.send_key, now));

                    let op = match record.apply_add(bin_name, delta) {
                        Ok(value) => {
                            result = Ok(value);
                            if void == VoidTime::Expired {
                                Op::Remove
                            } else {
                                record.touch(void, now);
                                Op::Put(record)
                            }
                        }
                        Err(e) => {
                            result = Err(e);
                            Op::Nop
                        }
                    };
                    ready(op)
                })
                .await;
            result
        })
        .await
    }

    async fn remove(&self, policy: &WritePolicy, key: &RecordKey) -> Result<()> {
        self.check_connected()?;
        self.namespaces.get(&key.namespace)?;

        with_deadline(policy.total_timeout, "remove", async {
            let now = now_ms();
            match self.cache.remove(&Self::slot(key)).await {
                Some(record) if record.is_live(now) => Ok(()),
                _ => Err(Error::NotFound),
            }
        })
        .await
    }

    /// Snapshot then invalidate; records written after the snapshot survive
    async fn truncate(&self, namespace: &str, set_name: Option<&str>) -> Result<()> {
        self.check_connected()?;
        self.namespaces.get(namespace)?;
        let set_name = set_name.filter(|s| !s.is_empty());

        let victims: Vec<_> = self
            .cache
            .iter()
            .filter(|(slot, record)| slot.0 == namespace && record.set_name.as_deref() == set_name)
            .map(|(slot, _)| slot)
            .collect();

        for slot in &victims {
            self.cache.invalidate(slot.as_ref()).await;
        }

        info!(
            "Truncated {} record(s) from {}/{}",
            victims.len(),
            namespace,
            set_name.unwrap_or("<null>")
        );
        Ok(())
    }
}

impl Debug for MokaRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaRecordStore")
            .field("entry_count", &self.cache.entry_count())
            .field("connected", &self.is_connected())
            .finish()
    }
}
