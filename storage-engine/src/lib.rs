pub mod connector;
pub mod moka_store;
pub mod namespace;
pub mod record;
pub mod sled_store;

pub use connector::SledConnector;
pub use moka_store::MokaRecordStore;
pub use namespace::{NamespaceConfig, Namespaces};
pub use sled_store::SledRecordStore;
