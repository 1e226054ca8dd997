//! Bearer token issuing and verification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// Tracing target for token operations.
const TRACING_TARGET: &str = "conduit_server::service::auth";

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Identifier of the user the token was issued to.
    pub user_id: i64,
    /// Display name at the time of issuing.
    pub name: String,
    /// Email address at the time of issuing.
    pub email: Option<String>,
}

/// Outcome of verifying a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The token is valid and identifies a principal.
    Valid(Principal),
    /// The token could not be parsed.
    Malformed,
    /// The token is expired or not valid yet.
    Expired,
    /// Any other verification failure, such as a bad signature.
    Invalid,
}

/// Capability that verifies bearer tokens.
///
/// Signature and expiry checks live behind this trait; the authorization
/// stage only acts on the [`Verification`] outcome.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verifies a raw token.
    fn verify(&self, token: &str) -> Verification;
}

/// JWT claims of a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    iat: i64,
    nbf: i64,
    exp: i64,
}

/// A freshly issued session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// Encoded token, sent back as `Authorization: Bearer <token>`.
    pub token: String,
    /// When the token was issued.
    pub issued_at: Timestamp,
    /// When the token stops being accepted.
    pub expires_at: Timestamp,
}

/// HS256 keys for issuing and verifying session tokens.
///
/// Cheap to clone; all clones share the keys.
#[derive(Clone)]
pub struct SessionKeys {
    inner: Arc<SessionKeysInner>,
}

struct SessionKeysInner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_lifetime: SignedDuration,
}

impl SessionKeys {
    /// Creates keys from a shared secret.
    pub fn new(secret: &[u8], token_lifetime: Duration) -> Result<Self> {
        if secret.is_empty() {
            return Err(ErrorKind::Auth.with_context("session secret is empty"));
        }

        let token_lifetime = SignedDuration::try_from(token_lifetime)
            .map_err(|err| Error::wrap(ErrorKind::Input, err, "token lifetime is out of range"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

        tracing::debug!(
            target: TRACING_TARGET,
            token_lifetime = %token_lifetime,
            "session keys initialized"
        );

        Ok(Self {
            inner: Arc::new(SessionKeysInner {
                encoding_key: EncodingKey::from_secret(secret),
                decoding_key: DecodingKey::from_secret(secret),
                validation,
                token_lifetime,
            }),
        })
    }

    /// Returns how long issued tokens stay valid.
    #[inline]
    pub fn token_lifetime(&self) -> SignedDuration {
        self.inner.token_lifetime
    }

    /// Issues a token for `principal`.
    pub fn issue(&self, principal: &Principal) -> Result<IssuedToken> {
        let issued_at = Timestamp::now();
        let expires_at = issued_at
            .checked_add(self.inner.token_lifetime)
            .map_err(|err| Error::wrap(ErrorKind::Unknown, err, "token expiry overflows"))?;

        let claims = SessionClaims {
            sub: principal.user_id.to_string(),
            name: principal.name.clone(),
            email: principal.email.clone(),
            iat: issued_at.as_second(),
            nbf: issued_at.as_second(),
            exp: expires_at.as_second(),
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.inner.encoding_key,
        )
        .map_err(|err| Error::wrap(ErrorKind::Auth, err, "couldn't sign token"))?;

        tracing::debug!(
            target: TRACING_TARGET,
            user_id = principal.user_id,
            expires_at = %expires_at,
            "session token issued"
        );

        Ok(IssuedToken {
            token,
            issued_at,
            expires_at,
        })
    }
}

impl TokenVerifier for SessionKeys {
    fn verify(&self, token: &str) -> Verification {
        let decoded = jsonwebtoken::decode::<SessionClaims>(
            token,
            &self.inner.decoding_key,
            &self.inner.validation,
        );

        let claims = match decoded {
            Ok(data) => data.claims,
            Err(err) => {
                tracing::debug!(target: TRACING_TARGET, error = %err, "token rejected");
                return match err.kind() {
                    JwtErrorKind::InvalidToken
                    | JwtErrorKind::Base64(_)
                    | JwtErrorKind::Json(_)
                    | JwtErrorKind::Utf8(_) => Verification::Malformed,
                    JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                        Verification::Expired
                    }
                    _ => Verification::Invalid,
                };
            }
        };

        match claims.sub.parse() {
            Ok(user_id) => Verification::Valid(Principal {
                user_id,
                name: claims.name,
                email: claims.email,
            }),
            Err(_) => Verification::Malformed,
        }
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("token_lifetime", &self.inner.token_lifetime)
            .finish_non_exhaustive()
    }
}
