// plexkit-storage: JSON configuration store and append-only key-value store.

pub mod config;
pub mod error;
pub mod kv;

pub use config::{Storage, StoragePaths};
pub use error::Error;
pub use kv::{Database, DatabaseExt, DomainDatabase, Store, StoreConfig, SyncPolicy};
