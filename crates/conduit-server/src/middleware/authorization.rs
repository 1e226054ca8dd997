//! Bearer token authorization.

use std::fmt;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
#[cfg(feature = "config")]
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::handler::Envelope;
use crate::logging::{RequestContext, context_of};
use crate::service::{Principal, TokenVerifier, Verification};
use crate::{Error, ErrorKind};

/// Tracing target for authorization.
const TRACING_TARGET: &str = "conduit_server::middleware::authorization";

/// Transport status used when a token fails verification.
///
/// A malformed `Authorization` header is always `401`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Respond `401 Unauthorized`.
    #[default]
    Unauthorized,
    /// Respond `500`, for clients that depend on the historical behavior.
    Legacy,
}

impl RejectionPolicy {
    /// Returns the status a failed verification is answered with.
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Legacy => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Why a request was not authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The `Authorization` header is missing or not `<scheme> <token>`.
    MalformedHeader,
    /// The token could not be parsed.
    MalformedToken,
    /// The token is expired or not valid yet.
    ExpiredToken,
    /// The token failed verification for another reason.
    InvalidToken,
}

impl Rejection {
    /// Returns the client-facing message.
    pub fn message(self) -> &'static str {
        match self {
            Self::MalformedHeader => "you are not authorized",
            Self::MalformedToken => "token malformed",
            Self::ExpiredToken => "token expired",
            Self::InvalidToken => "couldn't handle token",
        }
    }

    /// Returns the rejection as a coded `Auth` error.
    pub fn into_error(self) -> Error {
        ErrorKind::Auth.with_context(self.message())
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Verifies bearer tokens and applies the [`RejectionPolicy`].
#[derive(Clone)]
pub struct Authorizer {
    verifier: Arc<dyn TokenVerifier>,
    policy: RejectionPolicy,
}

impl Authorizer {
    /// Creates an authorizer over a token verification capability.
    pub fn new(verifier: Arc<dyn TokenVerifier>, policy: RejectionPolicy) -> Self {
        Self { verifier, policy }
    }

    /// Returns the rejection policy.
    #[inline]
    pub fn policy(&self) -> RejectionPolicy {
        self.policy
    }

    /// Authorizes the value of an `Authorization` header.
    ///
    /// The header must split into exactly two space-separated parts,
    /// `<scheme> <token>`; only the token is verified. An empty token is
    /// still passed to the verifier.
    pub fn authorize(&self, header: Option<&HeaderValue>) -> Result<Principal, Rejection> {
        let value = header
            .and_then(|value| value.to_str().ok())
            .ok_or(Rejection::MalformedHeader)?;

        let token = match value.split(' ').collect::<Vec<_>>()[..] {
            [_scheme, token] => token,
            _ => return Err(Rejection::MalformedHeader),
        };

        match self.verifier.verify(token) {
            Verification::Valid(principal) => Ok(principal),
            Verification::Malformed => Err(Rejection::MalformedToken),
            Verification::Expired => Err(Rejection::ExpiredToken),
            Verification::Invalid => Err(Rejection::InvalidToken),
        }
    }

    /// Returns the response a rejection is answered with.
    pub fn reject(&self, rejection: Rejection) -> Response {
        let status = match rejection {
            Rejection::MalformedHeader => StatusCode::UNAUTHORIZED,
            _ => self.policy.status(),
        };

        Envelope::<()>::failure(&rejection.into_error())
            .with_status(status)
            .into_response()
    }
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorizer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Authorization middleware.
///
/// Rejected requests never reach the handler. Accepted requests carry the
/// [`Principal`] in their [`RequestContext`].
pub async fn require_authorization(
    State(authorizer): State<Authorizer>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = context_of(&mut request);
    let logger = context.logger().named("auth");

    match authorizer.authorize(request.headers().get(header::AUTHORIZATION)) {
        Ok(principal) => {
            logger.in_scope(|| {
                tracing::debug!(
                    target: TRACING_TARGET,
                    user_id = principal.user_id,
                    "request authorized"
                );
            });

            if let Some(context) = request.extensions_mut().get_mut::<RequestContext>() {
                context.set_principal(principal);
            }

            next.run(request).await
        }
        Err(rejection) => {
            logger.in_scope(|| {
                tracing::warn!(
                    target: TRACING_TARGET,
                    reason = %rejection,
                    policy = ?authorizer.policy(),
                    "request rejected"
                );
            });

            authorizer.reject(rejection)
        }
    }
}

/// Extracts the authenticated caller.
///
/// Fails with an `Auth` error on routes the authorization stage does not
/// guard.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(|context| context.principal().cloned())
            .ok_or_else(|| Rejection::MalformedHeader.into_error())
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum_test::TestServer;

    use std::time::Duration;

    use super::*;
    use crate::service::SessionKeys;
    use crate::test_utils::{ScriptedVerifier, alice};

    fn authorizer(verification: Verification, policy: RejectionPolicy) -> Authorizer {
        Authorizer::new(Arc::new(ScriptedVerifier::new(verification)), policy)
    }

    fn server(authorizer: Authorizer) -> anyhow::Result<TestServer> {
        async fn whoami(principal: Principal) -> Envelope<Principal> {
            Envelope::ok(principal)
        }

        let router = Router::new()
            .route("/", get(whoami))
            .route_layer(from_fn_with_state(authorizer, require_authorization));
        Ok(TestServer::new(router)?)
    }

    #[test]
    fn header_must_have_two_parts() {
        let authorizer = authorizer(Verification::Valid(alice()), RejectionPolicy::default());

        for value in ["Bearer", "Bearer a b", ""] {
            let header = HeaderValue::from_str(value).ok();
            assert_eq!(
                authorizer.authorize(header.as_ref()),
                Err(Rejection::MalformedHeader),
                "{value:?}"
            );
        }

        let header = HeaderValue::from_static("Bearer abc");
        assert_eq!(authorizer.authorize(Some(&header)), Ok(alice()));
    }

    #[test]
    fn empty_token_is_verified() -> anyhow::Result<()> {
        let keys = SessionKeys::new(b"0123456789abcdef0123456789abcdef", Duration::from_secs(60))?;
        let authorizer = Authorizer::new(Arc::new(keys), RejectionPolicy::default());

        let header = HeaderValue::from_static("Bearer ");
        let rejection = authorizer.authorize(Some(&header));
        assert_eq!(rejection, Err(Rejection::MalformedToken));
        assert_eq!(Rejection::MalformedToken.to_string(), "token malformed");
        Ok(())
    }

    #[test]
    fn verification_outcomes_map_to_rejections() {
        let header = HeaderValue::from_static("Bearer abc");
        let cases = [
            (Verification::Malformed, Rejection::MalformedToken),
            (Verification::Expired, Rejection::ExpiredToken),
            (Verification::Invalid, Rejection::InvalidToken),
        ];

        for (verification, expected) in cases {
            let authorizer = authorizer(verification, RejectionPolicy::default());
            assert_eq!(authorizer.authorize(Some(&header)), Err(expected));
        }
    }

    #[tokio::test]
    async fn valid_token_reaches_handler() -> anyhow::Result<()> {
        let server = server(authorizer(
            Verification::Valid(alice()),
            RejectionPolicy::default(),
        ))?;

        let response = server
            .get("/")
            .add_header(header::AUTHORIZATION, "Bearer abc")
            .await;
        response.assert_status_ok();

        let envelope = response.json::<Envelope<Principal>>();
        assert_eq!(envelope.data, Some(alice()));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_header_is_unauthorized() -> anyhow::Result<()> {
        let server = server(authorizer(
            Verification::Valid(alice()),
            RejectionPolicy::Legacy,
        ))?;

        let response = server
            .get("/")
            .add_header(header::AUTHORIZATION, "abc")
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let envelope = response.json::<Envelope>();
        assert_eq!(envelope.code, 2);
        assert_eq!(envelope.message, "you are not authorized");
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_uses_rejection_policy() -> anyhow::Result<()> {
        let server = server(authorizer(
            Verification::Expired,
            RejectionPolicy::Unauthorized,
        ))?;

        let response = server
            .get("/")
            .add_header(header::AUTHORIZATION, "Bearer abc")
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Envelope>().message, "token expired");
        Ok(())
    }
}
