//! JSON extractor with validation.

use axum::extract::{FromRequest, Request};
use derive_more::{Deref, DerefMut, From};
use serde::de::DeserializeOwned;
use validator::Validate;

use super::Json;
use crate::Error;

/// JSON extractor that also runs `validator` rules.
///
/// Deserialization and validation failures are both `Input` errors.
#[must_use]
#[derive(Debug, Clone, Copy, Default, Deref, DerefMut, From)]
pub struct ValidateJson<T>(pub T);

impl<T> ValidateJson<T> {
    /// Returns the inner validated value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T, S> FromRequest<S> for ValidateJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(data) = <Json<T> as FromRequest<S>>::from_request(req, state).await?;
        data.validate()?;
        Ok(Self(data))
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::middleware::from_fn;
    use axum::routing::post;
    use axum_test::TestServer;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::handler::Envelope;
    use crate::middleware::recover;

    #[derive(Debug, Deserialize, Validate)]
    struct Signup {
        #[validate(length(min = 1, max = 64))]
        name: String,
        #[validate(email)]
        email: String,
    }

    async fn signup(ValidateJson(body): ValidateJson<Signup>) -> Envelope<String> {
        Envelope::ok(format!("{} <{}>", body.name, body.email))
    }

    fn server() -> anyhow::Result<TestServer> {
        let router = Router::new()
            .route("/", post(signup))
            .route_layer(from_fn(recover));
        Ok(TestServer::new(router)?)
    }

    #[tokio::test]
    async fn valid_body_is_accepted() -> anyhow::Result<()> {
        let response = server()?
            .post("/")
            .json(&json!({"name": "alice", "email": "alice@example.com"}))
            .await;

        let envelope = response.json::<Envelope<String>>();
        assert_eq!(envelope.code, 0);
        assert_eq!(envelope.data.as_deref(), Some("alice <alice@example.com>"));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_body_is_an_input_error() -> anyhow::Result<()> {
        let response = server()?
            .post("/")
            .json(&json!({"name": "", "email": "not-an-email"}))
            .await;

        response.assert_status_ok();
        assert_eq!(response.json::<Envelope>().code, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unparsable_body_is_an_input_error() -> anyhow::Result<()> {
        let response = server()?
            .post("/")
            .text("{not json")
            .content_type("application/json")
            .await;

        assert_eq!(response.json::<Envelope>().code, 1);
        Ok(())
    }
}
