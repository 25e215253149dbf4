mod engine;
mod recovery;
mod store;

pub use engine::SyncPolicy;
pub use store::{Database, DatabaseExt, DomainDatabase, Store, StoreConfig};
