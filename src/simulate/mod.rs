pub mod model;
pub mod pool;
pub mod stats;
pub mod worker;

pub use pool::{PoolConfig, WorkerPool};
pub use stats::{PoolStats, StatsSnapshot};
pub use worker::{Lifecycle, LifecycleConfig};
