//! Repositories.
//!
//! Every method takes `&mut AsyncPgConnection`, so the same code runs on a
//! bare pooled connection or inside a request's [`PgTransaction`].
//!
//! [`PgTransaction`]: crate::PgTransaction

mod user;

use serde::{Deserialize, Serialize};
pub use user::UserRepository;

/// A window over an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 1000;

    /// Builds a window, forcing `limit` into `1..=MAX_LIMIT` and `offset` to `>= 0`.
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset: offset.max(0),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, 0)
    }
}
