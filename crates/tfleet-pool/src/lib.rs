pub mod error;
pub mod pool;

pub use error::PoolError;
pub use pool::run_pool;
