//! sqlx-cluster Library
//!
//! Read/write splitting on top of sqlx: a [`ClusterDb`] routes writes to one
//! writer and reads to a random reader, any handle can be wrapped in a statement
//! logging decorator, and a [`PoolManager`] keeps named clusters with lazy
//! construction.

pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod handle;
pub mod logged;
pub mod models;

pub use cluster::{ClusterDb, ClusterOptions, PoolManager};
pub use config::Config;
pub use db::SqlxConnection;
pub use error::{DbError, DbResult};
pub use handle::{Command, CommandExt, Connection, Handle, Transaction};
pub use logged::{LogOptions, begin, with_logging, without_logging};
pub use models::{
    ExecResult, IsolationLevel, NamedArgs, Row, RowResult, Rows, Statement, TxOptions, Value,
};
