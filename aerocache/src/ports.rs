#![deny(clippy::all)]

use crate::domain::policy::{ReadPolicy, WritePolicy};
use crate::domain::{Bins, Record, RecordKey, RecordMetadata};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::Result;
use shared::config::Host;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

// Ports are the pluggable extension points on both sides of the adapter

/// Port for building a record store client from a seed host list
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, hosts: &[Host]) -> Result<Arc<dyn RecordStore>>;
}

/// Port for the record store client the cache adapter delegates to
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn connect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn close(&self);

    /// Fails with `Error::NotFound` when the record is absent or expired
    async fn get(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<Record>;
    async fn get_header(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<RecordMetadata>;
    async fn exists(&self, policy: &ReadPolicy, key: &RecordKey) -> Result<bool>;
    async fn put(&self, policy: &WritePolicy, key: &RecordKey, bins: Bins) -> Result<()>;
    /// Atomically adds `delta` to an integer bin, creating it when missing
    async fn add(
        &self,
        policy: &WritePolicy,
        key: &RecordKey,
        bin_name: &str,
        delta: i64,
    ) -> Result<i64>;
    /// Fails with `Error::NotFound` when there was nothing to remove
    async fn remove(&self, policy: &WritePolicy, key: &RecordKey) -> Result<()>;
    /// Removes every record of a set, or of the null set when `set_name` is `None`.
    /// Not atomic with respect to concurrent writes into the same set.
    async fn truncate(&self, namespace: &str, set_name: Option<&str>) -> Result<()>;
}

/// Capability interface every cache backend implements.
///
/// Methods never fail: reads report a miss and writes report `false`
/// when the backing store is unavailable.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, timeout: Option<i64>) -> bool;
    /// Like `set`, but returns `false` instead of overwriting a live key
    async fn add(&self, key: &str, value: Value, timeout: Option<i64>) -> bool;
    async fn delete(&self, key: &str) -> bool;
    async fn has(&self, key: &str) -> bool;
    /// Best-effort removal of every entry this backend owns. Writes racing
    /// the clear may survive it, and `false` means nothing is guaranteed
    /// to have been removed.
    async fn clear(&self) -> bool;
    async fn inc(&self, key: &str, delta: i64) -> Option<i64>;

    async fn dec(&self, key: &str, delta: i64) -> Option<i64> {
        self.inc(key, delta.checked_neg()?).await
    }

    async fn get_many(&self, keys: &[&str]) -> Vec<Option<Value>> {
        join_all(keys.iter().map(|key| self.get(key))).await
    }

    async fn set_many(&self, entries: Vec<(String, Value)>, timeout: Option<i64>) -> Vec<bool> {
        join_all(
            entries
                .into_iter()
                .map(|(key, value)| async move { self.set(&key, value, timeout).await }),
        )
        .await
    }

    async fn delete_many(&self, keys: &[&str]) -> Vec<bool> {
        join_all(keys.iter().map(|key| self.delete(key))).await
    }

    async fn get_dict(&self, keys: &[&str]) -> HashMap<String, Option<Value>> {
        let values = self.get_many(keys).await;
        keys.iter().map(|k| k.to_string()).zip(values).collect()
    }
}

/// Typed access on top of any `CacheBackend`
#[async_trait]
pub trait CacheBackendExt: CacheBackend {
    async fn get_as<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Cached value for key '{}' has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    async fn set_as<T>(&self, key: &str, value: &T, timeout: Option<i64>) -> bool
    where
        T: Serialize + Sync,
    {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize value for key '{}': {}", key, e);
                return false;
            }
        };
        self.set(key, value, timeout).await
    }
}

impl<B: CacheBackend + ?Sized> CacheBackendExt for B {}
