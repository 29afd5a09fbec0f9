//! Resource pools: a fixed worker thread pool for request processing and
//! a bounded SQL handle pool for the auth path.

mod sql;
mod threadpool;

pub use sql::{SqlGuard, SqlPool, SqlPoolConfig};
pub use threadpool::ThreadPool;
