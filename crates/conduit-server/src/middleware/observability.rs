//! Request tracing and access logging.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::instrument::WithSubscriber;

use crate::logging::{self, TRACE_ID_HEADER, TraceId, context_of, query_trace_id};

/// Tracing target for the access log.
const TRACING_TARGET: &str = "conduit_server::middleware::access";

/// Access log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
#[must_use = "config does nothing unless you use it"]
pub struct AccessLogConfig {
    /// Requests slower than this many milliseconds are logged as slow.
    #[cfg_attr(
        feature = "config",
        arg(long, env = "SLOW_REQUEST_THRESHOLD_MS", default_value = "3000")
    )]
    pub slow_request_threshold_ms: u64,

    /// Paths that are never access-logged, e.g. health checks.
    #[cfg_attr(
        feature = "config",
        arg(long, env = "ACCESS_LOG_SKIP_PATHS", value_delimiter = ',')
    )]
    pub skip_paths: Vec<String>,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            slow_request_threshold_ms: 3000,
            skip_paths: Vec::new(),
        }
    }
}

impl AccessLogConfig {
    /// Returns the slow request threshold.
    #[inline]
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }

    /// Returns whether requests to `path` are access-logged.
    pub fn logs_path(&self, path: &str) -> bool {
        !self.skip_paths.iter().any(|skip| skip == path)
    }

    /// Logs the configuration.
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET,
            slow_request_threshold_ms = self.slow_request_threshold_ms,
            skip_paths = ?self.skip_paths,
            "access log configuration"
        );
    }
}

/// Produces the trace identifier of a request that arrives without a valid
/// [`TRACE_ID_HEADER`]: the `trace_id` query parameter, else a new one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTraceId;

impl MakeRequestId for MakeTraceId {
    fn make_request_id<B>(&mut self, request: &axum::http::Request<B>) -> Option<RequestId> {
        let trace_id = query_trace_id(request.uri()).unwrap_or_else(TraceId::generate);
        trace_id.to_header_value().map(RequestId::new)
    }
}

/// Removes an inbound [`TRACE_ID_HEADER`] that is not a usable trace
/// identifier, so [`MakeTraceId`] replaces it.
pub async fn discard_invalid_trace_id(mut request: Request) -> Request {
    let valid = request
        .headers()
        .get(&TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(TraceId::parse)
        .is_some();
    if !valid {
        request.headers_mut().remove(&TRACE_ID_HEADER);
    }
    request
}

/// Request tracing middleware.
///
/// Runs inside the request id layers, which already put the trace
/// identifier on the inbound request and copy it to the response. Runs the
/// request under the process-wide logger, inside the request span, and
/// writes one access log line.
pub async fn trace_request(
    State(config): State<Arc<AccessLogConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let dispatch = logging::current();
    handle(config, request, next).with_subscriber(dispatch).await
}

async fn handle(config: Arc<AccessLogConfig>, mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let context = context_of(&mut request);

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let query = request.uri().query().unwrap_or_default().to_owned();
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "-".to_owned(), |ConnectInfo(addr)| addr.to_string());

    let logger = context.logger().clone();
    let response = logger.instrument(next.run(request)).await;

    if !config.logs_path(&path) {
        return response;
    }

    let latency = start.elapsed();
    let status = response.status().as_u16();
    let latency_ms = latency.as_millis() as u64;

    logger.in_scope(|| {
        macro_rules! access {
            ($level:ident) => {
                tracing::$level!(
                    target: TRACING_TARGET,
                    %method, %path, %query, status, latency_ms, %client,
                    "request completed"
                )
            };
        }

        match status {
            500.. => access!(error),
            400..=499 => access!(warn),
            _ => access!(info),
        }

        if latency > config.slow_threshold() {
            tracing::warn!(
                target: TRACING_TARGET,
                %method, %path, latency_ms,
                slow_threshold_ms = config.slow_request_threshold_ms,
                "hit slow request"
            );
        }
    });

    response
}
