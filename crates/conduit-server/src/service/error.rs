//! Service startup errors.

use conduit_postgres::PgError;
use thiserror::Error;

/// Result type for service startup.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failure while building the [`ServiceState`].
///
/// Request handling never produces these; they abort startup.
///
/// [`ServiceState`]: crate::service::ServiceState
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The database could not be reached or migrated.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: PgError,
    },

    /// Session keys could not be created.
    #[error("Authentication error: {0}")]
    Auth(#[source] crate::Error),
}

impl ServiceError {
    /// Creates a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a new database error.
    pub fn database(message: impl Into<String>, source: PgError) -> Self {
        Self::Database {
            message: message.into(),
            source,
        }
    }
}
