//! Coded error taxonomy.
//!
//! Every failure that reaches a client is classified into exactly one
//! [`ErrorKind`], each bound to a stable numeric code:
//!
//! | kind       | code | message         |
//! |------------|------|-----------------|
//! | (success)  | 0    | `OK`            |
//! | `Input`    | 1    | `Input error`   |
//! | `Auth`     | 2    | `Auth error`    |
//! | `Database` | 3    | `DB error`      |
//! | `NotFound` | 4    | `Not found`     |
//! | `Unknown`  | 100  | `Unknown error` |
//!
//! An [`Error`] carries a kind, an optional context message and an optional
//! cause. Wrapping keeps the cause, so the rendering of a wrapped error is
//! every context message joined with `": "` in wrap order, followed by the
//! root cause.

use std::any::Any;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use axum::extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection};
use conduit_postgres::PgError;
use strum::{EnumIter, IntoEnumIterator};
use validator::{ValidationError, ValidationErrors};

/// Type alias for boxed errors that are Send + Sync.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Result type alias with [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Code reported by a successful response envelope.
pub const SUCCESS_CODE: i32 = 0;

/// Message reported by a successful response envelope.
pub const SUCCESS_MESSAGE: &str = "OK";

/// Classification of an application error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ErrorKind {
    /// The request was malformed or failed validation.
    Input,
    /// The caller could not be authorized.
    Auth,
    /// A database operation failed.
    Database,
    /// The requested resource does not exist.
    NotFound,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Returns the stable numeric code. Never `0`, which is reserved for success.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Input => 1,
            Self::Auth => 2,
            Self::Database => 3,
            Self::NotFound => 4,
            Self::Unknown => 100,
        }
    }

    /// Returns the human-readable message bound to the code.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Input => "Input error",
            Self::Auth => "Auth error",
            Self::Database => "DB error",
            Self::NotFound => "Not found",
            Self::Unknown => "Unknown error",
        }
    }

    /// Looks a kind up by its numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::iter().find(|kind| kind.code() == code)
    }

    /// Creates an error of this kind with a context message.
    #[inline]
    pub fn with_context(self, context: impl Into<Cow<'static, str>>) -> Error {
        Error::new(self).with_context(context)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// An error carrying a fixed classification and a chain of context messages.
///
/// Cloning is cheap; the cause is shared. Two errors compare equal when
/// their codes match: the message text is informational only.
#[derive(Clone)]
#[must_use = "errors do nothing unless returned or rendered"]
pub struct Error {
    kind: ErrorKind,
    context: Option<Cow<'static, str>>,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Creates a bare error of the given kind.
    #[inline]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Wraps `cause` into an error of `kind` with a context message.
    ///
    /// Renders as `context: cause`.
    pub fn wrap(
        kind: ErrorKind,
        cause: impl Into<BoxedError>,
        context: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            context: Some(context.into()),
            source: Some(Arc::from(cause.into())),
        }
    }

    /// Wraps an arbitrary error with a context message, keeping the kind its
    /// cause chain classifies to.
    pub fn from_cause(
        cause: impl StdError + Send + Sync + 'static,
        context: impl Into<Cow<'static, str>>,
    ) -> Self {
        let kind = classify(&cause).kind;
        Self::wrap(kind, cause, context)
    }

    /// Adds another layer of context on top of this error.
    ///
    /// The kind is preserved, so `e.context("a").context("b")` renders as
    /// `b: a: <e>` and still classifies as `e`'s kind.
    pub fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        let kind = self.kind;
        Self::wrap(kind, self, context)
    }

    /// Sets the context message of a freshly created error.
    #[inline]
    pub fn with_context(mut self, context: impl Into<Cow<'static, str>>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Attaches a cause to a freshly created error.
    #[inline]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error kind.
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the numeric code of the error kind.
    #[inline]
    pub const fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Returns the outermost context message, if any.
    #[inline]
    pub fn context_message(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns whether the error has the given kind.
    #[inline]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.context, &self.source) {
            (Some(context), Some(source)) => write!(f, "{context}: {source}"),
            (Some(context), None) => f.write_str(context),
            (None, Some(source)) => write!(f, "{}: {source}", self.kind),
            (None, None) => f.write_str(self.kind.message()),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("code", &self.kind.code())
            .field("context", &self.context)
            .field("source", &self.source)
            .finish()
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for Error {}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<PgError> for Error {
    fn from(err: PgError) -> Self {
        let kind = if err.is_not_found() {
            ErrorKind::NotFound
        } else {
            ErrorKind::Database
        };

        Self::new(kind).with_source(err)
    }
}

macro_rules! impl_input_error {
    ($($t:ty),+) => {$(
        impl From<$t> for Error {
            fn from(err: $t) -> Self {
                Self::new(ErrorKind::Input).with_source(err)
            }
        }
    )+};
}

impl_input_error!(
    ValidationErrors,
    JsonRejection,
    QueryRejection,
    PathRejection,
    FormRejection
);

/// Extension methods for attaching context to fallible results.
pub trait ResultExt<T> {
    /// Wraps the error with a context message, keeping its classification.
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T>;

    /// Wraps the error into an error of `kind` with a context message.
    fn wrap_err(self, kind: ErrorKind, context: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|err| Error::from_cause(err, context))
    }

    fn wrap_err(self, kind: ErrorKind, context: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|err| Error::wrap(kind, err, context))
    }
}

/// Classifies an arbitrary error.
///
/// Walks the `source()` chain and returns the innermost [`Error`] unchanged,
/// so classifying an already coded error never re-codes it. Otherwise a known
/// validation shape classifies as [`ErrorKind::Input`] and anything else as
/// [`ErrorKind::Unknown`]. Pure: no logging, no allocation beyond the clone.
pub fn classify(err: &(dyn StdError + 'static)) -> Error {
    let mut innermost = None;
    let mut validation = false;
    let mut current = Some(err);

    while let Some(err) = current {
        if let Some(coded) = err.downcast_ref::<Error>() {
            innermost = Some(coded);
        } else if is_validation_failure(err) {
            validation = true;
        }

        current = err.source();
    }

    match innermost {
        Some(coded) => coded.clone(),
        None if validation => Error::new(ErrorKind::Input),
        None => Error::new(ErrorKind::Unknown),
    }
}

/// Classifies a panic payload.
///
/// A payload that is itself an [`Error`] keeps its classification;
/// everything else is [`ErrorKind::Unknown`] with the panic text as context.
pub fn classify_panic(payload: &(dyn Any + Send)) -> Error {
    if let Some(err) = payload.downcast_ref::<Error>() {
        return classify(err);
    }

    Error::new(ErrorKind::Unknown).with_context(panic_message(payload).to_owned())
}

/// Extracts the message of a `panic!` payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if payload.is::<Error>() {
        "coded error"
    } else {
        "unknown panic payload"
    }
}

fn is_validation_failure(err: &(dyn StdError + 'static)) -> bool {
    err.is::<ValidationErrors>()
        || err.is::<ValidationError>()
        || err.is::<JsonRejection>()
        || err.is::<QueryRejection>()
        || err.is::<PathRejection>()
        || err.is::<FormRejection>()
}
