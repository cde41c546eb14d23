//! Data models for the cluster layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod value;

pub use connection::{ClusterConfig, DatabaseType, NodeConfig, NodeConfigError, NodeRole};
pub use query::{ExecResult, IsolationLevel, Row, RowResult, Rows, Statement, TxOptions};
pub use value::{NamedArgs, Value};
