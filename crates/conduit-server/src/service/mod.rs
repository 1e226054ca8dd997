//! Application state and dependency injection.

mod auth;
mod config;
mod database;
mod error;

use std::sync::Arc;

use conduit_postgres::PgClient;

pub use crate::service::auth::{IssuedToken, Principal, SessionKeys, TokenVerifier, Verification};
pub use crate::service::config::{ServiceConfig, ServiceConfigBuilder};
pub use crate::service::database::{Database, Transaction};
pub use crate::service::error::{ServiceError, ServiceResult};
use crate::middleware::Authorizer;

/// Application state.
///
/// Used for the [`State`] extraction (dependency injection).
///
/// [`State`]: axum::extract::State
#[must_use = "state does nothing unless you use it"]
#[derive(Clone)]
pub struct ServiceState {
    pub postgres: PgClient,
    pub session_keys: SessionKeys,
    pub authorizer: Authorizer,
}

impl ServiceState {
    /// Initializes application state from configuration.
    ///
    /// The connection pool is lazy; only a migration run touches the
    /// database here.
    pub async fn from_config(config: &ServiceConfig) -> ServiceResult<Self> {
        config.validate()?;

        let session_keys = config.load_session_keys()?;
        let authorizer = Authorizer::new(
            Arc::new(session_keys.clone()),
            config.rejection_policy,
        );

        Ok(Self {
            postgres: config.connect_postgres().await?,
            session_keys,
            authorizer,
        })
    }
}

macro_rules! impl_di {
    ($($f:ident: $t:ty),+) => {$(
        impl axum::extract::FromRef<ServiceState> for $t {
            fn from_ref(state: &ServiceState) -> Self {
                state.$f.clone()
            }
        }
    )+};
}

impl_di!(postgres: PgClient);
impl_di!(session_keys: SessionKeys);
impl_di!(authorizer: Authorizer);
