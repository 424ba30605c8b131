pub mod audit;
pub mod error;
pub mod memory;
pub mod s3;
pub mod store;

pub use audit::AuditLogger;
pub use error::StoreError;
pub use memory::InMemoryStateStoreClient;
pub use s3::{S3StateStoreClient, S3StateStoreConfig};
pub use store::{LockHandle, StateStoreClient};
