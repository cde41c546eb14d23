//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx pool and transaction types are distinct per backend, so every
//! operation is written once per variant. These macros keep those arms short.

/// Generate match arms over a backend enum (`DbPool` or `DbTransaction`).
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, &self.pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($enum:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $enum::$variant($p) => $body,
            )+
        }
    };
}

/// Bind every positional argument to a sqlx query with a backend bind function.
#[macro_export]
macro_rules! bind_args {
    ($query:expr, $args:expr, $bind:path) => {
        $args.iter().fold($query, |query, arg| $bind(query, arg))
    };
}

pub use bind_args;
pub use impl_db_dispatch;
