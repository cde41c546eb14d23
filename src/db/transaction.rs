//! sqlx-backed transaction handle.
//!
//! A transaction holds one dedicated connection until it is committed or rolled
//! back. Statements issued concurrently on the same transaction are serialised.

use async_trait::async_trait;
use sqlx::{Column, MySql, Postgres, Sqlite};
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::named::NamedQuery;
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::types::decode_rows;
use crate::error::{DbError, DbResult};
use crate::handle::{Command, Transaction};
use crate::models::{
    DatabaseType, ExecResult, NamedArgs, Row, RowResult, Rows, Statement, Value,
};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(sqlx::Transaction<'static, MySql>),
    Postgres(sqlx::Transaction<'static, Postgres>),
    SQLite(sqlx::Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn commit(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction, self, {
            MySql(tx) => tx.commit().await.map_err(|e| lifecycle_error("COMMIT", e)),
            Postgres(tx) => tx.commit().await.map_err(|e| lifecycle_error("COMMIT", e)),
            SQLite(tx) => tx.commit().await.map_err(|e| lifecycle_error("COMMIT", e)),
        })
    }

    pub async fn rollback(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction, self, {
            MySql(tx) => tx.rollback().await.map_err(|e| lifecycle_error("ROLLBACK", e)),
            Postgres(tx) => tx.rollback().await.map_err(|e| lifecycle_error("ROLLBACK", e)),
            SQLite(tx) => tx.rollback().await.map_err(|e| lifecycle_error("ROLLBACK", e)),
        })
    }
}

/// A statement the database refused while opening or finishing a transaction.
///
/// Connection-level failures keep their own variant so they stay retryable.
pub(crate) fn lifecycle_error(step: &str, err: sqlx::Error) -> DbError {
    match DbError::from(err) {
        DbError::Database {
            message, sql_state, ..
        } => DbError::transaction(match sql_state {
            Some(code) => format!("{} failed ({}): {}", step, code, message),
            None => format!("{} failed: {}", step, message),
        }),
        other => other,
    }
}

/// An open transaction exposed through the [`Transaction`] surface.
///
/// Dropping it without commit rolls back.
pub struct SqlxTransaction {
    db_type: DatabaseType,
    tx: Mutex<DbTransaction>,
}

impl std::fmt::Debug for SqlxTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxTransaction")
            .field("db_type", &self.db_type)
            .finish_non_exhaustive()
    }
}

impl SqlxTransaction {
    pub fn new(tx: DbTransaction) -> Self {
        Self {
            db_type: tx.db_type(),
            tx: Mutex::new(tx),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }
}

#[async_trait]
impl Command for SqlxTransaction {
    async fn execute(&self, query: &str, args: &[Value]) -> DbResult<ExecResult> {
        debug!(sql = %query, params = args.len(), "Executing statement in transaction");
        let mut guard = self.tx.lock().await;
        let result: ExecResult = impl_db_dispatch!(DbTransaction, &mut *guard, {
            MySql(tx) => bind_args!(sqlx::query(query), args, bind_mysql_param)
                .execute(&mut **tx)
                .await?
                .into(),
            Postgres(tx) => bind_args!(sqlx::query(query), args, bind_postgres_param)
                .execute(&mut **tx)
                .await?
                .into(),
            SQLite(tx) => bind_args!(sqlx::query(query), args, bind_sqlite_param)
                .execute(&mut **tx)
                .await?
                .into(),
        });
        Ok(result)
    }

    async fn query(&self, query: &str, args: &[Value]) -> DbResult<Rows> {
        debug!(sql = %query, params = args.len(), "Executing query in transaction");
        let db = self.db_type;
        let mut guard = self.tx.lock().await;
        let rows = impl_db_dispatch!(DbTransaction, &mut *guard, {
            MySql(tx) => decode_rows(
                &bind_args!(sqlx::query(query), args, bind_mysql_param)
                    .fetch_all(&mut **tx)
                    .await?,
                db,
            ),
            Postgres(tx) => decode_rows(
                &bind_args!(sqlx::query(query), args, bind_postgres_param)
                    .fetch_all(&mut **tx)
                    .await?,
                db,
            ),
            SQLite(tx) => decode_rows(
                &bind_args!(sqlx::query(query), args, bind_sqlite_param)
                    .fetch_all(&mut **tx)
                    .await?,
                db,
            ),
        });
        Ok(Rows::new(rows))
    }

    async fn query_row(&self, query: &str, args: &[Value]) -> RowResult {
        RowResult::new(self.get(query, args).await)
    }

    async fn get(&self, query: &str, args: &[Value]) -> DbResult<Row> {
        let db = self.db_type;
        let mut guard = self.tx.lock().await;
        let rows = impl_db_dispatch!(DbTransaction, &mut *guard, {
            MySql(tx) => bind_args!(sqlx::query(query), args, bind_mysql_param)
                .fetch_optional(&mut **tx)
                .await?
                .map(|row| decode_rows(std::slice::from_ref(&row), db)),
            Postgres(tx) => bind_args!(sqlx::query(query), args, bind_postgres_param)
                .fetch_optional(&mut **tx)
                .await?
                .map(|row| decode_rows(std::slice::from_ref(&row), db)),
            SQLite(tx) => bind_args!(sqlx::query(query), args, bind_sqlite_param)
                .fetch_optional(&mut **tx)
                .await?
                .map(|row| decode_rows(std::slice::from_ref(&row), db)),
        });
        rows.and_then(|rows| rows.into_iter().next())
            .ok_or(DbError::RowNotFound)
    }

    async fn select(&self, query: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        Ok(self.query(query, args).await?.rows)
    }

    async fn prepare(&self, query: &str) -> DbResult<Statement> {
        use sqlx::Statement as _;

        let mut guard = self.tx.lock().await;
        let columns: Vec<String> = impl_db_dispatch!(DbTransaction, &mut *guard, {
            MySql(tx) => sqlx::Executor::prepare(&mut **tx, query)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Postgres(tx) => sqlx::Executor::prepare(&mut **tx, query)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            SQLite(tx) => sqlx::Executor::prepare(&mut **tx, query)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        });
        Ok(Statement::new(query, columns))
    }

    async fn named_execute(&self, query: &str, args: &NamedArgs) -> DbResult<ExecResult> {
        let named = NamedQuery::compile(query, self.db_type)?;
        let values = named.bind(args)?;
        self.execute(&named.sql, &values).await
    }

    async fn named_query(&self, query: &str, args: &NamedArgs) -> DbResult<Rows> {
        let named = NamedQuery::compile(query, self.db_type)?;
        let values = named.bind(args)?;
        self.query(&named.sql, &values).await
    }
}

#[async_trait]
impl Transaction for SqlxTransaction {
    async fn commit(self: Box<Self>) -> DbResult<()> {
        debug!(db_type = %self.db_type, "Committing transaction");
        self.tx.into_inner().commit().await
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        debug!(db_type = %self.db_type, "Rolling back transaction");
        self.tx.into_inner().rollback().await
    }

    fn driver_name(&self) -> &str {
        self.db_type.driver_name()
    }

    fn into_unlogged(self: Box<Self>) -> Box<dyn Transaction> {
        self
    }
}
