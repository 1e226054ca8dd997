//! All `axum::`[`Router`]s with related `axum::`[`Handler`]s.
//!
//! Routes are grouped by the pipeline stages they need:
//!
//! - utility routes (`/echo`) only recover;
//! - public routes (`/auth/*`) also run in a request transaction;
//! - private routes (`/api/*`) additionally require authorization.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use conduit_server::handler::routes;
//! use conduit_server::middleware::{AccessLogConfig, CorsConfig, RouterPipelineExt};
//! use conduit_server::service::{ServiceConfig, ServiceState};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let state = ServiceState::from_config(&ServiceConfig::default()).await?;
//! let app: axum::Router = routes(state.clone())
//!     .with_cors(&CorsConfig::default())
//!     .with_request_tracing(AccessLogConfig::default())
//!     .with_state(state);
//! # Ok(())
//! # }
//! ```
//!
//! [`Router`]: axum::routing::Router
//! [`Handler`]: axum::handler::Handler

mod authentication;
mod constraints;
mod echo;
mod request;
mod response;
mod users;

use axum::Router;
use axum::http::StatusCode;

pub use crate::handler::authentication::SessionResponse;
pub use crate::handler::request::{
    CreateUser, EchoQuery, LoginRequest, PaginationQuery, UpdateUserRequest, UserPath,
};
pub use crate::handler::response::Envelope;
pub use crate::handler::users::DeletedUser;
use crate::middleware::RouterPipelineExt;
use crate::service::ServiceState;
use crate::{Error, ErrorKind};

/// Answers unmatched paths with a `NotFound` envelope and status 404.
#[inline]
async fn fallback() -> Envelope<()> {
    Envelope::failure(&Error::new(ErrorKind::NotFound)).with_status(StatusCode::NOT_FOUND)
}

/// Returns a [`Router`] with all routes and their group stages.
///
/// Request tracing and CORS wrap the whole router and are left to the
/// caller; see [`RouterPipelineExt`].
pub fn routes(state: ServiceState) -> Router<ServiceState> {
    let utility_router = echo::routes().with_recovery();

    let public_router = authentication::routes()
        .with_recovery()
        .with_transaction(state.postgres.clone());

    let private_router = users::routes()
        .with_recovery()
        .with_transaction(state.postgres.clone())
        .with_authorization(state.authorizer.clone());

    Router::new()
        .merge(utility_router)
        .merge(public_router)
        .merge(private_router)
        .fallback(fallback)
}
