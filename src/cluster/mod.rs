//! Cluster routing and the named cluster registry.

pub mod manager;
pub mod router;

pub use manager::{LazyFactory, PoolManager};
pub use router::{ClusterDb, ClusterOptions};
