//! Contextual and process-wide logging.
//!
//! Log statements are plain [`tracing`] macros. What makes them contextual is
//! the span they run in: the request tracing stage opens one `request` span per
//! request, carrying its trace identifier, and runs the rest of the pipeline
//! inside it. Any event emitted while handling the request therefore carries
//! the trace identifier without the caller passing it.
//!
//! The subscriber those spans and events go to is the process-wide
//! [`current`] logger, which can be swapped at runtime with [`replace`].

mod context;
mod global;

pub use context::{
    ContextLogger, RequestContext, TRACE_ID_HEADER, TRACE_ID_QUERY, TraceId, logger_for,
    resolve_trace_id,
};
pub(crate) use context::{context_of, query_trace_id};
pub use global::{RestoreLogger, current, init, replace};

/// Tracing target for the request logger spans.
pub const TRACING_TARGET: &str = "conduit_server::request";
