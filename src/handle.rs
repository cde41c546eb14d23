//! The command surface every connection handle implements.
//!
//! The router, the logging decorator and the registry are written only against
//! these traits. [`crate::db::SqlxConnection`] is the sqlx-backed implementation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::DbResult;
use crate::logged::LogOptions;
use crate::models::{ExecResult, NamedArgs, Row, RowResult, Rows, Statement, TxOptions, Value};

/// Shared handle to a connection, a decorated connection or a cluster.
pub type Handle = Arc<dyn Connection>;

/// Statements that can run on a connection or inside a transaction.
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, query: &str, args: &[Value]) -> DbResult<ExecResult>;

    async fn query(&self, query: &str, args: &[Value]) -> DbResult<Rows>;

    /// Fetch at most one row. Errors, including "no rows", surface through the result.
    async fn query_row(&self, query: &str, args: &[Value]) -> RowResult;

    /// Fetch exactly one row; `DbError::RowNotFound` when there is none.
    async fn get(&self, query: &str, args: &[Value]) -> DbResult<Row>;

    async fn select(&self, query: &str, args: &[Value]) -> DbResult<Vec<Row>>;

    async fn prepare(&self, query: &str) -> DbResult<Statement>;

    async fn named_execute(&self, query: &str, args: &NamedArgs) -> DbResult<ExecResult>;

    async fn named_query(&self, query: &str, args: &NamedArgs) -> DbResult<Rows>;
}

#[async_trait]
pub trait Connection: Command {
    async fn begin(&self) -> DbResult<Box<dyn Transaction>> {
        self.begin_with(TxOptions::default()).await
    }

    async fn begin_with(&self, options: TxOptions) -> DbResult<Box<dyn Transaction>>;

    async fn ping(&self) -> DbResult<()>;

    /// Close the underlying pool(s). Closing twice is harmless.
    async fn close(&self);

    fn driver_name(&self) -> &str;

    /// Logging configuration, when this handle is a logging decorator.
    fn log_options(&self) -> Option<&LogOptions> {
        None
    }

    /// The handle this one decorates, when this handle is a logging decorator.
    fn unwrap_logged(&self) -> Option<Handle> {
        None
    }

    /// A copy of this handle with its own logging replaced (`Some`) or removed (`None`),
    /// for handles that log internally rather than through a decorator.
    /// `None` means the caller should decorate from outside.
    fn relog(&self, _options: Option<LogOptions>) -> Option<Handle> {
        None
    }
}

#[async_trait]
pub trait Transaction: Command {
    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;

    fn driver_name(&self) -> &str;

    fn log_options(&self) -> Option<&LogOptions> {
        None
    }

    /// Strip a logging decorator, returning the bare transaction.
    /// Undecorated transactions return themselves.
    fn into_unlogged(self: Box<Self>) -> Box<dyn Transaction>;
}

/// Typed helpers over any [`Command`].
#[async_trait]
pub trait CommandExt: Command {
    async fn get_as<T: DeserializeOwned>(&self, query: &str, args: &[Value]) -> DbResult<T> {
        self.get(query, args).await?.decode()
    }

    async fn select_as<T: DeserializeOwned + Send>(
        &self,
        query: &str,
        args: &[Value],
    ) -> DbResult<Vec<T>> {
        self.select(query, args)
            .await?
            .iter()
            .map(Row::decode)
            .collect()
    }
}

impl<C: Command + ?Sized> CommandExt for C {}

impl Statement {
    pub async fn execute<C: Command + ?Sized>(&self, on: &C, args: &[Value]) -> DbResult<ExecResult> {
        on.execute(&self.sql, args).await
    }

    pub async fn query<C: Command + ?Sized>(&self, on: &C, args: &[Value]) -> DbResult<Rows> {
        on.query(&self.sql, args).await
    }
}

/// Strip logging decorators down to the bare handle.
pub fn base_handle(handle: &Handle) -> Handle {
    let mut current = Arc::clone(handle);
    while let Some(inner) = current.unwrap_logged() {
        current = inner;
    }
    current
}

/// Identity comparison of two handles (data pointer only).
pub fn same_handle(a: &Handle, b: &Handle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
