//! PostgreSQL store.
//!
//! Multi-row mutations run inside one sqlx transaction. Single-row updates
//! rely on row-level atomicity.

mod file;
mod records;
mod session;

use sqlx::PgPool;

use vaultfs_core::error::{AppError, ErrorKind};

/// Metadata store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map an sqlx error, turning unique violations into `Conflict`.
pub(crate) fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        let unique = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
        if unique {
            AppError::with_source(ErrorKind::Conflict, format!("{context}: already exists"), e)
        } else {
            AppError::with_source(ErrorKind::Database, context, e)
        }
    }
}
