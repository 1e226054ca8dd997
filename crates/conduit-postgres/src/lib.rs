#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub(crate) const MIGRATIONS: diesel_migrations::EmbeddedMigrations =
    diesel_migrations::embed_migrations!();

/// Tracing target for pool and connection lifecycle events.
pub const TRACING_TARGET_CONNECTION: &str = "conduit_postgres::connection";

/// Tracing target for schema migrations.
pub const TRACING_TARGET_MIGRATION: &str = "conduit_postgres::migration";

/// Tracing target for repository queries.
pub const TRACING_TARGET_QUERY: &str = "conduit_postgres::query";

/// Tracing target for request-scoped transactions.
pub const TRACING_TARGET_TRANSACTION: &str = "conduit_postgres::transaction";

mod client;
pub mod model;
pub mod query;
mod schema;
mod transaction;

use std::borrow::Cow;

use deadpool::managed::TimeoutType;
use diesel::ConnectionError;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
pub use diesel_async::AsyncPgConnection as PgConnection;

pub use crate::client::{
    MigrationReport, PgClient, PgConfig, PgConn, PoolStatus, RedactedUrl, run_pending_migrations,
};
pub use crate::transaction::PgTransaction;

pub mod error {
    //! Foreign error types that appear inside [`PgError`].
    //!
    //! [`PgError`]: crate::PgError

    pub use deadpool::managed::TimeoutType;
    pub use diesel::result::{ConnectionError, DatabaseErrorKind, Error as DieselError};
}

/// Failure of a database operation.
#[derive(Debug, thiserror::Error)]
#[must_use = "database errors should be handled"]
pub enum PgError {
    /// Rejected pool or connection settings.
    #[error("invalid database configuration: {0}")]
    Config(String),

    /// No pooled connection became available in time.
    #[error("timed out waiting for a database connection ({0:?})")]
    Timeout(TimeoutType),

    /// The server could not be reached or dropped the connection.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Applying embedded migrations failed.
    #[error("migration failed: {0}")]
    Migration(Box<dyn std::error::Error + Send + Sync>),

    /// A statement failed, including `BEGIN`, `COMMIT` and `ROLLBACK`.
    #[error("{0}")]
    Query(#[from] DieselError),

    /// The pool itself misbehaved.
    #[error("{0}")]
    Unexpected(Cow<'static, str>),
}

impl PgError {
    /// Returns the name of the violated constraint, if any.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            Self::Query(DieselError::DatabaseError(_, info)) => info.constraint_name(),
            _ => None,
        }
    }

    /// Returns whether the statement matched no row.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Query(DieselError::NotFound))
    }

    /// Returns whether the statement violated a unique constraint.
    #[inline]
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Query(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
        )
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for PgError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        use deadpool::managed::PoolError;
        use diesel_async::pooled_connection::PoolError as ManagerError;

        match err {
            PoolError::Timeout(kind) => Self::Timeout(kind),
            PoolError::Backend(ManagerError::ConnectionError(err)) => Self::Connection(err),
            PoolError::Backend(ManagerError::QueryError(err)) => Self::Query(err),
            PoolError::Closed => Self::Unexpected("connection pool is closed".into()),
            PoolError::NoRuntimeSpecified => {
                Self::Unexpected("connection pool has no async runtime".into())
            }
            PoolError::PostCreateHook(err) => Self::Unexpected(err.to_string().into()),
        }
    }
}

/// Result of a database operation.
pub type PgResult<T, E = PgError> = Result<T, E>;
