use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use conduit_postgres::{PgClient, PgConfig, run_pending_migrations};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use super::{ServiceError, ServiceResult, SessionKeys};
use crate::middleware::RejectionPolicy;

/// Tracing target for service configuration.
const TRACING_TARGET: &str = "conduit_server::service::config";

/// Default values for configuration options.
mod defaults {
    /// Development-only signing secret.
    pub const JWT_SECRET: &str = "conduit-development-secret";

    /// Default session token lifetime: one day.
    pub const TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;
}

/// App [`state`] configuration.
///
/// [`state`]: crate::service::ServiceState
#[derive(Clone, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "config", derive(Args))]
#[must_use = "config does nothing unless you use it"]
#[builder(
    pattern = "owned",
    setter(into, prefix = "with"),
    build_fn(validate = "Self::validate")
)]
pub struct ServiceConfig {
    /// Postgres connection and pool settings.
    #[cfg_attr(feature = "config", command(flatten))]
    #[builder(default)]
    pub postgres: PgConfig,

    /// Secret used to sign and verify session tokens.
    #[cfg_attr(
        feature = "config",
        arg(long = "jwt-secret", env = "JWT_SECRET", default_value = defaults::JWT_SECRET, hide_env_values = true)
    )]
    #[builder(default = "defaults::JWT_SECRET.to_owned()")]
    pub jwt_secret: String,

    /// Lifetime of issued session tokens in seconds.
    #[cfg_attr(
        feature = "config",
        arg(long = "token-lifetime-secs", env = "TOKEN_LIFETIME_SECS", default_value_t = defaults::TOKEN_LIFETIME_SECS)
    )]
    #[builder(default = "defaults::TOKEN_LIFETIME_SECS")]
    pub token_lifetime_secs: u64,

    /// Status used when a bearer token fails verification.
    #[cfg_attr(
        feature = "config",
        arg(long = "auth-rejection", env = "AUTH_REJECTION", value_enum, default_value_t = RejectionPolicy::Unauthorized)
    )]
    #[builder(default)]
    pub rejection_policy: RejectionPolicy,

    /// Apply pending schema migrations at startup.
    #[cfg_attr(
        feature = "config",
        arg(long = "run-migrations", env = "RUN_MIGRATIONS", default_value_t = false)
    )]
    #[builder(default)]
    pub run_migrations: bool,
}

impl ServiceConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Returns the session token lifetime.
    #[inline]
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ServiceResult<()> {
        self.postgres
            .validate()
            .map_err(|err| ServiceError::config(err.to_string()))?;

        if self.jwt_secret.is_empty() {
            return Err(ServiceError::config("JWT secret cannot be empty"));
        }

        if self.token_lifetime_secs == 0 {
            return Err(ServiceError::config(
                "Token lifetime must be at least 1 second",
            ));
        }

        Ok(())
    }

    /// Creates the Postgres client and optionally applies migrations.
    pub async fn connect_postgres(&self) -> ServiceResult<PgClient> {
        let pg_client = self
            .postgres
            .clone()
            .build()
            .map_err(|err| ServiceError::database("Failed to create database client", err))?;

        if self.run_migrations {
            run_pending_migrations(&pg_client)
                .await
                .map_err(|err| ServiceError::database("Failed to apply migrations", err))?;
        }

        Ok(pg_client)
    }

    /// Creates the session keys.
    pub fn load_session_keys(&self) -> ServiceResult<SessionKeys> {
        SessionKeys::new(self.jwt_secret.as_bytes(), self.token_lifetime()).map_err(ServiceError::Auth)
    }

    /// Logs the configuration. The signing secret is never logged.
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET,
            database_url = %self.postgres.redacted_url(),
            pool_size = self.postgres.pool_size,
            slow_query_ms = self.postgres.slow_query_ms,
            token_lifetime_secs = self.token_lifetime_secs,
            rejection_policy = ?self.rejection_policy,
            run_migrations = self.run_migrations,
            "service configuration"
        );
    }
}

impl ServiceConfigBuilder {
    fn validate(builder: &ServiceConfigBuilder) -> Result<(), String> {
        if let Some(secret) = &builder.jwt_secret
            && secret.is_empty()
        {
            return Err("JWT secret cannot be empty".to_owned());
        }

        if let Some(postgres) = &builder.postgres {
            postgres.validate().map_err(|err| err.to_string())?;
        }

        if builder.token_lifetime_secs == Some(0) {
            return Err("Token lifetime must be at least 1 second".to_owned());
        }

        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            postgres: PgConfig::default(),
            jwt_secret: defaults::JWT_SECRET.to_owned(),
            token_lifetime_secs: defaults::TOKEN_LIFETIME_SECS,
            rejection_policy: RejectionPolicy::default(),
            run_migrations: false,
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("postgres", &self.postgres)
            .field("jwt_secret", &"***")
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .field("rejection_policy", &self.rejection_policy)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() -> anyhow::Result<()> {
        let config = ServiceConfig::builder()
            .with_jwt_secret("s3cret")
            .with_token_lifetime_secs(60u64)
            .build()?;

        assert_eq!(config.token_lifetime(), Duration::from_secs(60));
        assert_eq!(config.rejection_policy, RejectionPolicy::Unauthorized);
        assert!(!config.run_migrations);
        Ok(())
    }

    #[test]
    fn builder_rejects_empty_secret() {
        assert!(ServiceConfig::builder().with_jwt_secret("").build().is_err());
    }

    #[test]
    fn zero_lifetime_is_invalid() {
        let config = ServiceConfig {
            token_lifetime_secs: 0,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let config = ServiceConfig {
            jwt_secret: "hunter2".into(),
            ..ServiceConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
