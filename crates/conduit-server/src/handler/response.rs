//! The uniform response envelope.

use std::borrow::Cow;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::middleware::Failure;
use crate::{Error, ErrorKind, SUCCESS_CODE, SUCCESS_MESSAGE};

/// Body of every response: `{"data": .., "code": .., "message": ..}`.
///
/// `code` is [`SUCCESS_CODE`] exactly when the request succeeded, and `data`
/// is `null` whenever it did not.
#[must_use]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    pub data: Option<T>,
    pub code: i32,
    pub message: Cow<'static, str>,
    #[serde(skip, default = "default_status")]
    status: StatusCode,
}

fn default_status() -> StatusCode {
    StatusCode::OK
}

impl<T> Envelope<T> {
    /// Successful envelope with status 200.
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            code: SUCCESS_CODE,
            message: Cow::Borrowed(SUCCESS_MESSAGE),
            status: StatusCode::OK,
        }
    }

    /// Successful envelope with status 201.
    pub fn created(data: T) -> Self {
        Self::ok(data).with_status(StatusCode::CREATED)
    }

    /// Error envelope with status 200.
    ///
    /// `Unknown` errors always render the generic kind message so internals
    /// never leak to clients; every other kind renders the full context chain.
    pub fn failure(error: &Error) -> Self {
        let message = match error.kind() {
            ErrorKind::Unknown => Cow::Borrowed(ErrorKind::Unknown.message()),
            _ => Cow::Owned(error.to_string()),
        };

        Self {
            data: None,
            code: error.code(),
            message,
            status: StatusCode::OK,
        }
    }

    /// Overrides the transport status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Returns the transport status.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns whether the envelope reports success.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Handlers return errors as-is; the recovery stage renders them.
///
/// The response is an empty-bodied 500 carrying the error as a [`Failure`]
/// extension, so even without the recovery stage nothing leaks.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(Failure(self));
        response
    }
}

impl IntoResponse for ErrorKind {
    fn into_response(self) -> Response {
        Error::new(self).into_response()
    }
}
