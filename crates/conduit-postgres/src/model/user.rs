//! User model.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::users;

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    /// Unique user identifier.
    pub id: i64,
    /// Display name, never blank.
    pub name: String,
    /// Optional unique email address.
    pub email: Option<String>,
    /// Optional age in years.
    pub age: Option<i32>,
}

/// Data for creating a new user.
#[derive(Debug, Default, Clone, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub age: Option<i32>,
}

/// Partial update of a user; `None` fields are left untouched.
#[derive(Debug, Default, Clone, AsChangeset)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub age: Option<i32>,
}

impl UpdateUser {
    /// Returns whether the update would change nothing.
    ///
    /// Diesel rejects an empty changeset, so callers should skip the query.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.age.is_none()
    }
}
