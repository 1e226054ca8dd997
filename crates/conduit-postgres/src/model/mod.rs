//! Diesel models for the database tables.

mod user;

pub use user::{NewUser, UpdateUser, User};
