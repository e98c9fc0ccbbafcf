use crate::codec;
use crate::domain::policy::{ReadPolicy, WritePolicy};
use crate::domain::{Bins, Expiration, RecordKey, RecordMetadata};
use crate::ports::{CacheBackend, RecordStore, StoreConnector};
use async_trait::async_trait;
use serde_json::Value;
use shared::config::CacheSettings;
use shared::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Cache backend that keeps entries in a namespace/set of a record store.
///
/// Every entry is one record holding the serialized value in the `"v"` bin.
/// Reads fail open and writes report `false` on any store fault; only
/// construction returns errors.
pub struct AeroCache {
    client: Arc<dyn RecordStore>,
    namespace: String,
    set_name: Option<String>,
    default_timeout: u32,
    operation_timeout: Option<Duration>,
    owns_client: bool,
}

impl AeroCache {
    pub const BIN_NAME: &str = "v";

    /// Wrap an already built client. The client stays open when the cache is dropped.
    pub async fn new(client: Arc<dyn RecordStore>, settings: &CacheSettings) -> Result<Self> {
        Self::build(client, settings, false).await
    }

    /// Build a cache from settings. A prebuilt client takes precedence over
    /// the host list; with neither this fails before any I/O.
    pub async fn factory(
        settings: &CacheSettings,
        client: Option<Arc<dyn RecordStore>>,
        connector: &dyn StoreConnector,
    ) -> Result<Self> {
        settings.validate()?;

        match client {
            Some(client) => Self::build(client, settings, false).await,
            None if !settings.hosts.is_empty() => {
                let client = connector.connect(&settings.hosts).await?;
                debug!("Initialized client for hosts {:?}", settings.hosts);
                Self::build(client, settings, true).await
            }
            None => Err(Error::Config("must specify client or hosts".to_string())),
        }
    }

    async fn build(
        client: Arc<dyn RecordStore>,
        settings: &CacheSettings,
        owns_client: bool,
    ) -> Result<Self> {
        settings.validate()?;
        client.connect().await?;

        Ok(Self {
            client,
            namespace: settings.namespace.clone(),
            set_name: settings.set_name.clone().filter(|s| !s.is_empty()),
            default_timeout: settings.default_timeout,
            operation_timeout: settings.operation_timeout_ms.map(Duration::from_millis),
            owns_client,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    pub fn default_timeout(&self) -> u32 {
        self.default_timeout
    }

    /// Record address for a cache key
    pub fn record_key(&self, key: &str) -> RecordKey {
        RecordKey::new(&self.namespace, self.set_name.as_deref(), key)
    }

    pub fn expiration(&self, timeout: Option<i64>) -> Expiration {
        Expiration::from_timeout(timeout, self.default_timeout)
    }

    fn read_policy(&self) -> ReadPolicy {
        ReadPolicy::new(self.operation_timeout)
    }

    fn write_policy(&self, timeout: Option<i64>) -> WritePolicy {
        WritePolicy::new(self.expiration(timeout)).with_total_timeout(self.operation_timeout)
    }

    fn bins(value: &Value) -> Result<Bins> {
        Ok(Bins::from([(Self::BIN_NAME.to_string(), codec::encode(value)?)]))
    }

    pub async fn try_get(&self, key: &str) -> Result<Value> {
        let mut record = self
            .client
            .get(&self.read_policy(), &self.record_key(key))
            .await?;
        let bin = record.bins.remove(Self::BIN_NAME).ok_or_else(|| {
            Error::Serialization(format!("record has no '{}' bin", Self::BIN_NAME))
        })?;
        codec::decode(bin)
    }

    pub async fn try_set(&self, key: &str, value: &Value, timeout: Option<i64>) -> Result<()> {
        let bins = Self::bins(value)?;
        self.client
            .put(&self.write_policy(timeout), &self.record_key(key), bins)
            .await
    }

    pub async fn try_add(&self, key: &str, value: &Value, timeout: Option<i64>) -> Result<()> {
        let bins = Self::bins(value)?;
        self.client
            .put(
                &self.write_policy(timeout).create_only(),
                &self.record_key(key),
                bins,
            )
            .await
    }

    pub async fn try_delete(&self, key: &str) -> Result<()> {
        self.client
            .remove(&self.write_policy(None), &self.record_key(key))
            .await
    }

    pub async fn try_has(&self, key: &str) -> Result<bool> {
        self.client
            .exists(&self.read_policy(), &self.record_key(key))
            .await
    }

    /// Truncates the configured set (or the null set) of the namespace.
    ///
    /// Best effort and eventually consistent: the store removes the set's
    /// records one by one, so a write racing the truncate may survive it.
    /// Entries of other sets are untouched. A refused truncate is reported
    /// as is; there is no fallback to scanning and deleting from here.
    pub async fn try_clear(&self) -> Result<()> {
        self.client
            .truncate(&self.namespace, self.set_name.as_deref())
            .await
    }

    pub async fn try_inc(&self, key: &str, delta: i64) -> Result<i64> {
        self.client
            .add(
                &self.write_policy(None),
                &self.record_key(key),
                Self::BIN_NAME,
                delta,
            )
            .await
    }

    pub async fn try_get_metadata(&self, key: &str) -> Result<RecordMetadata> {
        self.client
            .get_header(&self.read_policy(), &self.record_key(key))
            .await
    }

    /// Record metadata (generation and remaining TTL), `None` on a miss
    pub async fn get_metadata(&self, key: &str) -> Option<RecordMetadata> {
        match self.try_get_metadata(key).await {
            Ok(meta) => Some(meta),
            Err(Error::NotFound) => None,
            Err(e) => {
                warn!("Failed to read metadata for key '{}': Error {}: {}", key, e.code(), e);
                None
            }
        }
    }

    /// Close the client if it is connected. Returns `false` when there was
    /// nothing to close.
    pub fn close_client(&self) -> bool {
        if self.client.is_connected() {
            debug!("Closing record store client for namespace '{}'", self.namespace);
            self.client.close();
            return true;
        }
        false
    }

    fn log_write_failure(&self, op: &str, key: &str, timeout: Option<i64>, err: &Error) {
        match err {
            Error::Forbidden(msg) => error!(
                "Failed to {} key '{}' with TTL (timeout={:?}, expiration={:?}). \
                 Namespace supervisor (nsup) is disabled on namespace '{}'. Error {}: {}",
                op,
                key,
                timeout,
                self.expiration(timeout),
                self.namespace,
                err.code(),
                msg
            ),
            Error::NamespaceNotFound(ns) => error!(
                "Failed to {} key '{}': namespace '{}' is not configured on the cluster. Error {}",
                op,
                key,
                ns,
                err.code()
            ),
            _ => error!("Failed to {} key '{}'. Error {}: {}", op, key, err.code(), err),
        }
    }
}

#[async_trait]
impl CacheBackend for AeroCache {
    async fn get(&self, key: &str) -> Option<Value> {
        match self.try_get(key).await {
            Ok(value) => {
                debug!("Cache hit on key: {}", key);
                Some(value)
            }
            Err(Error::NotFound) => {
                debug!("Cache miss on key: {}", key);
                None
            }
            Err(e) => {
                warn!(
                    "Treating key '{}' as a miss after read failure. Error {}: {}",
                    key,
                    e.code(),
                    e
                );
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, timeout: Option<i64>) -> bool {
        match self.try_set(key, &value, timeout).await {
            Ok(()) => true,
            Err(e) => {
                self.log_write_failure("set", key, timeout, &e);
                false
            }
        }
    }

    async fn add(&self, key: &str, value: Value, timeout: Option<i64>) -> bool {
        match self.try_add(key, &value, timeout).await {
            Ok(()) => true,
            Err(Error::RecordExists) => {
                debug!("Key '{}' already exists, not added", key);
                false
            }
            Err(e) => {
                self.log_write_failure("add", key, timeout, &e);
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match self.try_delete(key).await {
            Ok(()) => true,
            Err(Error::NotFound) => {
                debug!("Nothing to delete for key: {}", key);
                false
            }
            Err(e) => {
                self.log_write_failure("delete", key, None, &e);
                false
            }
        }
    }

    async fn has(&self, key: &str) -> bool {
        match self.try_has(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Existence check failed for key '{}'. Error {}: {}", key, e.code(), e);
                false
            }
        }
    }

    async fn clear(&self) -> bool {
        match self.try_clear().await {
            Ok(()) => {
                info!(
                    "Truncated set '{}' in namespace '{}'",
                    self.set_name().unwrap_or("<null>"),
                    self.namespace
                );
                true
            }
            Err(Error::Forbidden(msg)) => {
                error!(
                    "Truncate of namespace '{}' was refused, the client lacks truncate privilege. Error {}: {}",
                    self.namespace,
                    shared::result_code::FAIL_FORBIDDEN,
                    msg
                );
                false
            }
            Err(e) => {
                error!("Failed to clear cache. Error {}: {}", e.code(), e);
                false
            }
        }
    }

    async fn inc(&self, key: &str, delta: i64) -> Option<i64> {
        match self.try_inc(key, delta).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.log_write_failure("increment", key, None, &e);
                None
            }
        }
    }
}

impl std::fmt::Debug for AeroCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeroCache")
            .field("namespace", &self.namespace)
            .field("set_name", &self.set_name)
            .field("default_timeout", &self.default_timeout)
            .field("owns_client", &self.owns_client)
            .finish()
    }
}

impl Drop for AeroCache {
    fn drop(&mut self) {
        if self.owns_client {
            self.close_client();
        }
    }
}
