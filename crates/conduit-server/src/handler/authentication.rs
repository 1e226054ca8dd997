//! Authentication handlers for login and registration.
//!
//! Both handlers run inside the request transaction: registration inserts
//! the user and issues its first token in one unit of work, so a failure to
//! sign the token leaves no half-registered user behind.

use axum::Router;
use axum::extract::State;
use axum::routing::post;
use conduit_postgres::PgTransaction;
use conduit_postgres::model::{NewUser, User};
use conduit_postgres::query::UserRepository;
use serde::{Deserialize, Serialize};

use super::Envelope;
use super::constraints::user_error;
use super::request::{CreateUser, LoginRequest};
use crate::extract::{Json, ValidateJson};
use crate::logging::RequestContext;
use crate::middleware::Tx;
use crate::service::{IssuedToken, Principal, ServiceState, SessionKeys};
use crate::{Error, ErrorKind, Result, ResultExt};

/// Tracing target for authentication operations.
const TRACING_TARGET: &str = "conduit_server::handler::authentication";

/// Response of both login and registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    /// The authenticated user.
    pub user: User,
    /// A freshly issued session token.
    pub token: IssuedToken,
}

fn principal_of(user: &User) -> Principal {
    Principal {
        user_id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
    }
}

/// Issues a session token for an existing user.
async fn login(
    State(session_keys): State<SessionKeys>,
    context: RequestContext,
    tx: Tx<PgTransaction>,
    Json(request): Json<LoginRequest>,
) -> Result<Envelope<SessionResponse>> {
    let user = {
        let mut transaction = tx.lock().await?;
        UserRepository::find_user_by_id(transaction.connection(), request.user_id)
            .await
            .map_err(Error::from)
            .context("loading user")?
    };

    let Some(user) = user else {
        context.logger().in_scope(|| {
            tracing::warn!(target: TRACING_TARGET, user_id = request.user_id, "login failed");
        });
        return Err(ErrorKind::NotFound.with_context(format!("user {}", request.user_id)));
    };

    let token = session_keys.issue(&principal_of(&user))?;
    context.logger().in_scope(|| {
        tracing::info!(target: TRACING_TARGET, user_id = user.id, "login succeeded");
    });

    Ok(Envelope::ok(SessionResponse { user, token }))
}

/// Creates a user and issues its first session token.
async fn register(
    State(session_keys): State<SessionKeys>,
    context: RequestContext,
    tx: Tx<PgTransaction>,
    ValidateJson(request): ValidateJson<CreateUser>,
) -> Result<Envelope<SessionResponse>> {
    let user = {
        let mut transaction = tx.lock().await?;
        UserRepository::create_user(transaction.connection(), NewUser::from(request))
            .await
            .map_err(user_error)
            .context("registering user")?
    };

    let token = session_keys.issue(&principal_of(&user))?;
    context.logger().in_scope(|| {
        tracing::info!(target: TRACING_TARGET, user_id = user.id, "user registered");
    });

    Ok(Envelope::created(SessionResponse { user, token }))
}

/// Returns a [`Router`] with the authentication routes.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
}
