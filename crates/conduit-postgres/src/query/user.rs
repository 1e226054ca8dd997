//! User repository.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use super::Pagination;
use crate::model::{NewUser, UpdateUser, User};
use crate::{PgError, PgResult, TRACING_TARGET_QUERY, schema};

/// Repository for user-related database operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserRepository;

impl UserRepository {
    /// Inserts a new user.
    pub async fn create_user(conn: &mut AsyncPgConnection, new_user: NewUser) -> PgResult<User> {
        use schema::users;

        let user = diesel::insert_into(users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(conn)
            .await
            .map_err(PgError::from)?;

        tracing::debug!(target: TRACING_TARGET_QUERY, user_id = user.id, "user created");
        Ok(user)
    }

    /// Finds a user by id.
    pub async fn find_user_by_id(
        conn: &mut AsyncPgConnection,
        user_id: i64,
    ) -> PgResult<Option<User>> {
        use schema::users::{self, dsl};

        users::table
            .filter(dsl::id.eq(user_id))
            .select(User::as_select())
            .first(conn)
            .await
            .optional()
            .map_err(PgError::from)
    }

    /// Lists users ordered by id.
    pub async fn list_users(
        conn: &mut AsyncPgConnection,
        pagination: Pagination,
    ) -> PgResult<Vec<User>> {
        use schema::users::{self, dsl};

        users::table
            .order(dsl::id.asc())
            .limit(pagination.limit)
            .offset(pagination.offset)
            .select(User::as_select())
            .load(conn)
            .await
            .map_err(PgError::from)
    }

    /// Applies a partial update and returns the updated row.
    ///
    /// An empty update only re-reads the row. A missing row is reported as
    /// diesel's "not found".
    pub async fn update_user(
        conn: &mut AsyncPgConnection,
        user_id: i64,
        updates: UpdateUser,
    ) -> PgResult<User> {
        use schema::users::{self, dsl};

        if updates.is_empty() {
            return Self::find_user_by_id(conn, user_id)
                .await?
                .ok_or(PgError::Query(diesel::result::Error::NotFound));
        }

        diesel::update(users::table.filter(dsl::id.eq(user_id)))
            .set(&updates)
            .returning(User::as_returning())
            .get_result(conn)
            .await
            .map_err(PgError::from)
    }

    /// Deletes a user and returns whether a row was removed.
    pub async fn delete_user(conn: &mut AsyncPgConnection, user_id: i64) -> PgResult<bool> {
        use schema::users::{self, dsl};

        let deleted = diesel::delete(users::table.filter(dsl::id.eq(user_id)))
            .execute(conn)
            .await
            .map_err(PgError::from)?;

        Ok(deleted > 0)
    }
}
