//! Constraint violation to coded error conversion.

use conduit_postgres::PgError;

use crate::{Error, ErrorKind};

/// Tracing target for constraint violations.
const TRACING_TARGET: &str = "conduit_server::handler::constraints";

/// Constraints of the `users` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UserConstraint {
    EmailUnique,
    NameNotBlank,
    AgeNotNegative,
}

impl UserConstraint {
    /// Looks up a constraint by its database name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "users_email_key" => Some(Self::EmailUnique),
            "users_name_check" => Some(Self::NameNotBlank),
            "users_age_check" => Some(Self::AgeNotNegative),
            _ => None,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::EmailUnique => "email is already registered",
            Self::NameNotBlank => "name cannot be blank",
            Self::AgeNotNegative => "age cannot be negative",
        }
    }
}

/// Converts a failed user query into a coded error.
///
/// Violations of the `users` constraints are caller mistakes and become
/// `Input` errors; everything else keeps the default database mapping.
pub(crate) fn user_error(error: PgError) -> Error {
    let Some(constraint) = error.constraint().and_then(UserConstraint::from_name) else {
        return Error::from(error);
    };

    tracing::debug!(
        target: TRACING_TARGET,
        constraint = ?constraint,
        "user constraint violated"
    );

    ErrorKind::Input
        .with_context(constraint.message())
        .with_source(error)
}

#[cfg(test)]
mod tests {
    use conduit_postgres::error::DieselError;

    use super::*;

    #[test]
    fn known_constraints_are_recognized() {
        assert_eq!(
            UserConstraint::from_name("users_email_key"),
            Some(UserConstraint::EmailUnique)
        );
        assert_eq!(UserConstraint::from_name("accounts_pkey"), None);
    }

    #[test]
    fn other_failures_keep_the_default_mapping() {
        let error = user_error(PgError::Query(DieselError::NotFound));
        assert!(error.is(ErrorKind::NotFound));

        let error = user_error(PgError::Unexpected("boom".into()));
        assert!(error.is(ErrorKind::Database));
    }
}
