//! sqlx database backend.
//!
//! This module provides the concrete connection handle:
//! - Database-specific pools and transactions
//! - Positional parameter binding and `:name` compilation
//! - Row decoding into [`crate::models::Row`]
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod named;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use named::NamedQuery;
pub use pool::{DbPool, SqlxConnection};
pub use transaction::{DbTransaction, SqlxTransaction};
pub use types::{TypeCategory, categorize_type};
