//! Per-request trace identifiers and loggers.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderName, HeaderValue, Request, Uri};
use serde::Deserialize;
use tracing::instrument::Instrumented;
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::TRACING_TARGET;
use crate::service::Principal;

/// Header a trace identifier is read from and echoed on.
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

/// Query parameter a trace identifier is read from when the header is absent.
pub const TRACE_ID_QUERY: &str = "trace_id";

/// Longest inbound trace identifier that is accepted.
const MAX_TRACE_ID_LEN: usize = 128;

/// Opaque identifier correlating every log line of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(Arc<str>);

impl TraceId {
    /// Generates a new time-ordered identifier.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string().into())
    }

    /// Accepts an inbound identifier.
    ///
    /// Returns `None` unless the value is non-empty visible ASCII of at most
    /// 128 bytes, so it can be echoed as a header and logged verbatim.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = !value.is_empty()
            && value.len() <= MAX_TRACE_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());

        valid.then(|| Self(value.into()))
    }

    /// Returns the identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier as a header value.
    pub fn to_header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TraceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A request-bound logger.
///
/// Wraps a span that carries the request's `trace_id` and the logger's
/// cumulative name. Everything logged inside the span, directly or through
/// [`in_scope`] and [`instrument`], is tagged with both.
///
/// The spans are created at `ERROR` level, so they stay enabled under any
/// filter that lets an event through.
///
/// [`in_scope`]: ContextLogger::in_scope
/// [`instrument`]: ContextLogger::instrument
#[derive(Debug, Clone)]
pub struct ContextLogger {
    span: Span,
    trace_id: TraceId,
    name: Arc<str>,
}

impl ContextLogger {
    /// Opens the root `request` logger for a trace identifier.
    pub fn new(trace_id: TraceId) -> Self {
        let span = tracing::error_span!(
            target: TRACING_TARGET,
            "request",
            trace_id = %trace_id,
            logger = "request",
        );

        Self {
            span,
            trace_id,
            name: Arc::from("request"),
        }
    }

    /// Returns a child logger scoped under `name`.
    ///
    /// Names accumulate: `request` named `tx` is `request.tx`, which named
    /// `commit` is `request.tx.commit`. The trace identifier never changes.
    pub fn named(&self, name: &str) -> Self {
        let name: Arc<str> = format!("{}.{name}", self.name).into();
        let span = tracing::error_span!(
            target: TRACING_TARGET,
            parent: &self.span,
            "scope",
            trace_id = %self.trace_id,
            logger = %name,
        );

        Self {
            span,
            trace_id: self.trace_id.clone(),
            name,
        }
    }

    /// Returns the underlying span.
    #[inline]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Returns the trace identifier this logger tags events with.
    #[inline]
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Returns the cumulative logger name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` inside the logger's span.
    pub fn in_scope<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.span.in_scope(f)
    }

    /// Attaches the logger's span to a future.
    pub fn instrument<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }
}

/// Request-scoped context stored in the request extensions.
///
/// Exactly one exists per request; it is created by the first stage that
/// needs it and dropped with the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    trace_id: TraceId,
    logger: ContextLogger,
    principal: Option<Principal>,
}

impl RequestContext {
    /// Creates the context for a resolved trace identifier.
    pub fn new(trace_id: TraceId) -> Self {
        Self {
            logger: ContextLogger::new(trace_id.clone()),
            trace_id,
            principal: None,
        }
    }

    /// Returns the request's trace identifier.
    #[inline]
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Returns the root request logger.
    #[inline]
    pub fn logger(&self) -> &ContextLogger {
        &self.logger
    }

    /// Returns the authenticated principal, if the request was authorized.
    #[inline]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub(crate) fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Returns the context stored in `extensions`, creating it on first use
    /// from the trace identifier `inbound` resolves.
    fn stored_or_insert(extensions: &mut Extensions, inbound: impl FnOnce() -> TraceId) -> Self {
        if let Some(context) = extensions.get::<Self>() {
            return context.clone();
        }

        let context = Self::new(inbound());
        extensions.insert(context.clone());
        context
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(&TRACE_ID_HEADER);
        let uri = &parts.uri;
        Ok(Self::stored_or_insert(&mut parts.extensions, || {
            inbound_trace_id(header, uri)
        }))
    }
}

/// Resolves the trace identifier of a request.
///
/// The first call stores the identifier in the [`RequestContext`]; later
/// calls return the same value even if headers change, so the identifier is
/// immutable for the rest of the request.
pub fn resolve_trace_id<B>(request: &mut Request<B>) -> TraceId {
    context_of(request).trace_id
}

/// Returns the request logger scoped under `name`.
///
/// Creates and caches the request context when it does not exist yet, so
/// repeated calls within a request share one trace identifier and one root
/// span.
pub fn logger_for<B>(request: &mut Request<B>, name: &str) -> ContextLogger {
    context_of(request).logger.named(name)
}

/// Returns the request's context, creating it on first use.
///
/// Precedence for a new context: the [`TRACE_ID_HEADER`], the
/// [`TRACE_ID_QUERY`] parameter, and finally a generated identifier.
pub(crate) fn context_of<B>(request: &mut Request<B>) -> RequestContext {
    let header = request.headers().get(&TRACE_ID_HEADER).cloned();
    let uri = request.uri().clone();
    RequestContext::stored_or_insert(request.extensions_mut(), || {
        inbound_trace_id(header.as_ref(), &uri)
    })
}

fn inbound_trace_id(header: Option<&HeaderValue>, uri: &Uri) -> TraceId {
    header
        .and_then(|value| value.to_str().ok())
        .and_then(TraceId::parse)
        .or_else(|| query_trace_id(uri))
        .unwrap_or_else(TraceId::generate)
}

pub(crate) fn query_trace_id(uri: &Uri) -> Option<TraceId> {
    #[derive(Deserialize)]
    struct TraceQuery {
        trace_id: Option<String>,
    }

    let Query(query) = Query::<TraceQuery>::try_from_uri(uri).ok()?;
    query.trace_id.as_deref().and_then(TraceId::parse)
}
