pub mod cache;
pub mod codec;
pub mod domain;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::AeroCache;
pub use domain::policy::{ReadPolicy, RecordExistsAction, WritePolicy};
pub use domain::{Bin, Bins, Expiration, Record, RecordKey, RecordMetadata};
pub use ports::{CacheBackend, CacheBackendExt, RecordStore, StoreConnector};
