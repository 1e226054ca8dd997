//! User management handlers.
//!
//! All routes require an authorized caller and run in the request
//! transaction.

use axum::Router;
use axum::routing::get;
use conduit_postgres::PgTransaction;
use conduit_postgres::model::{NewUser, UpdateUser, User};
use conduit_postgres::query::{Pagination, UserRepository};
use serde::{Deserialize, Serialize};

use super::Envelope;
use super::constraints::user_error;
use super::request::{CreateUser, PaginationQuery, UpdateUserRequest, UserPath};
use crate::extract::{Path, Query, ValidateJson};
use crate::middleware::Tx;
use crate::service::{Principal, ServiceState};
use crate::{ErrorKind, Result, ResultExt};

/// Tracing target for user operations.
const TRACING_TARGET: &str = "conduit_server::handler::users";

/// Response of the delete route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeletedUser {
    pub id: i64,
}

fn not_found(id: i64) -> crate::Error {
    ErrorKind::NotFound.with_context(format!("user {id}"))
}

/// Lists users ordered by id.
#[tracing::instrument(target = TRACING_TARGET, skip_all, fields(caller = principal.user_id))]
async fn list_users(
    principal: Principal,
    tx: Tx<PgTransaction>,
    Query(query): Query<PaginationQuery>,
) -> Result<Envelope<Vec<User>>> {
    let mut transaction = tx.lock().await?;
    let users = UserRepository::list_users(transaction.connection(), Pagination::from(query))
        .await
        .map_err(user_error)
        .context("listing users")?;

    tracing::debug!(target: TRACING_TARGET, count = users.len(), "users listed");
    Ok(Envelope::ok(users))
}

/// Returns a single user.
#[tracing::instrument(target = TRACING_TARGET, skip_all, fields(caller = principal.user_id, id = path.id))]
async fn get_user(
    principal: Principal,
    tx: Tx<PgTransaction>,
    Path(path): Path<UserPath>,
) -> Result<Envelope<User>> {
    let mut transaction = tx.lock().await?;
    let user = UserRepository::find_user_by_id(transaction.connection(), path.id)
        .await
        .map_err(user_error)
        .context("loading user")?;

    user.map(Envelope::ok).ok_or_else(|| not_found(path.id))
}

/// Creates a user.
#[tracing::instrument(target = TRACING_TARGET, skip_all, fields(caller = principal.user_id))]
async fn create_user(
    principal: Principal,
    tx: Tx<PgTransaction>,
    ValidateJson(request): ValidateJson<CreateUser>,
) -> Result<Envelope<User>> {
    let mut transaction = tx.lock().await?;
    let user = UserRepository::create_user(transaction.connection(), NewUser::from(request))
        .await
        .map_err(user_error)
        .context("creating user")?;

    tracing::info!(target: TRACING_TARGET, user_id = user.id, "user created");
    Ok(Envelope::created(user))
}

/// Applies a partial update to a user.
#[tracing::instrument(target = TRACING_TARGET, skip_all, fields(caller = principal.user_id, id = path.id))]
async fn update_user(
    principal: Principal,
    tx: Tx<PgTransaction>,
    Path(path): Path<UserPath>,
    ValidateJson(request): ValidateJson<UpdateUserRequest>,
) -> Result<Envelope<User>> {
    let mut transaction = tx.lock().await?;
    let user =
        UserRepository::update_user(transaction.connection(), path.id, UpdateUser::from(request))
            .await
            .map_err(|error| {
                if error.is_not_found() {
                    not_found(path.id)
                } else {
                    user_error(error)
                }
            })
            .context("updating user")?;

    tracing::info!(target: TRACING_TARGET, "user updated");
    Ok(Envelope::ok(user))
}

/// Deletes a user.
#[tracing::instrument(target = TRACING_TARGET, skip_all, fields(caller = principal.user_id, id = path.id))]
async fn delete_user(
    principal: Principal,
    tx: Tx<PgTransaction>,
    Path(path): Path<UserPath>,
) -> Result<Envelope<DeletedUser>> {
    let mut transaction = tx.lock().await?;
    let deleted = UserRepository::delete_user(transaction.connection(), path.id)
        .await
        .map_err(user_error)
        .context("deleting user")?;

    if !deleted {
        return Err(not_found(path.id));
    }

    tracing::info!(target: TRACING_TARGET, "user deleted");
    Ok(Envelope::ok(DeletedUser { id: path.id }))
}

/// Returns a [`Router`] with the user routes.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/api/user", get(list_users).post(create_user))
        .route(
            "/api/user/{id}",
            get(get_user).post(update_user).delete(delete_user),
        )
}
