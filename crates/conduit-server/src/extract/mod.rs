//! Extractors that reject with coded [`Error`]s.
//!
//! axum's own extractors reject with plain-text responses. These wrappers
//! turn every rejection into an `Input` error, so it reaches the recovery
//! stage and is answered with an envelope like any other failure.
//!
//! Also see [`Tx`] and [`Principal`], which extract the request transaction
//! and the authenticated caller.
//!
//! [`Error`]: crate::Error
//! [`Tx`]: crate::middleware::Tx
//! [`Principal`]: crate::service::Principal

mod validated_json;

use axum::extract::{FromRequest, FromRequestParts};
use derive_more::{Deref, DerefMut};

pub use self::validated_json::ValidateJson;
use crate::Error;

/// JSON body extractor.
///
/// Also see [`axum::Json`].
#[must_use]
#[derive(Debug, Clone, Copy, Default, Deref, DerefMut, FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct Json<T>(pub T);

/// Path parameters extractor.
///
/// Also see [`axum::extract::Path`].
#[must_use]
#[derive(Debug, Clone, Copy, Default, Deref, DerefMut, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(Error))]
pub struct Path<T>(pub T);

/// Query string extractor.
///
/// Also see [`axum::extract::Query`].
#[must_use]
#[derive(Debug, Clone, Copy, Default, Deref, DerefMut, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(Error))]
pub struct Query<T>(pub T);
