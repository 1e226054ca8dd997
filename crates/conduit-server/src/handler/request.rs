//! Request payloads.

use conduit_postgres::model::{NewUser, UpdateUser};
use conduit_postgres::query::Pagination;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// `GET /echo` query.
#[derive(Debug, Clone, Deserialize)]
pub struct EchoQuery {
    pub input: Option<String>,
}

/// `POST /auth/login` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub user_id: i64,
}

/// `POST /auth/register` and `POST /api/user` body.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(range(min = 0, max = 150))]
    pub age: Option<i32>,
}

impl From<CreateUser> for NewUser {
    fn from(request: CreateUser) -> Self {
        Self {
            name: request.name,
            email: request.email,
            age: request.age,
        }
    }
}

/// `POST /api/user/{id}` body. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(range(min = 0, max = 150))]
    pub age: Option<i32>,
}

impl From<UpdateUserRequest> for UpdateUser {
    fn from(request: UpdateUserRequest) -> Self {
        Self {
            name: request.name,
            email: request.email,
            age: request.age,
        }
    }
}

/// Pagination query of list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PaginationQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl From<PaginationQuery> for Pagination {
    fn from(query: PaginationQuery) -> Self {
        let default = Pagination::default();
        Pagination::new(
            query.limit.unwrap_or(default.limit),
            query.offset.unwrap_or(default.offset),
        )
    }
}

/// Path parameter of single-user routes.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UserPath {
    pub id: i64,
}
