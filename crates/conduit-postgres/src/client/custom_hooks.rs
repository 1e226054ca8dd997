//! Connection lifecycle hooks for the pool.

use std::time::{Duration, Instant};

use deadpool::managed::{HookResult, Metrics};
use diesel::ConnectionResult;
use diesel_async::pooled_connection::{PoolError, PoolableConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection};
use futures::FutureExt;
use futures::future::BoxFuture;

use super::instrumentation::QueryLogger;
use super::pg_config::RedactedUrl;
use crate::TRACING_TARGET_CONNECTION;

/// Opens a new connection and reports how long the handshake took.
pub(super) fn establish(url: &str) -> BoxFuture<'_, ConnectionResult<AsyncPgConnection>> {
    async move {
        let started = Instant::now();
        let result = AsyncPgConnection::establish(url).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(err) = &result {
            tracing::error!(
                target: TRACING_TARGET_CONNECTION,
                url = %RedactedUrl(url),
                elapsed_ms,
                error = %err,
                "connection refused"
            );
        } else {
            tracing::debug!(target: TRACING_TARGET_CONNECTION, elapsed_ms, "connection opened");
        }

        result
    }
    .boxed()
}

/// Runs once per new connection; attaches the statement logger.
pub(super) fn post_create(
    conn: &mut AsyncPgConnection,
    _: &Metrics,
    slow_query: Duration,
) -> HookResult<PoolError> {
    if conn.is_broken() {
        tracing::warn!(target: TRACING_TARGET_CONNECTION, "new connection is already broken");
    }
    conn.set_instrumentation(QueryLogger::new(slow_query));
    Ok(())
}

/// Runs when a connection comes back to the pool.
///
/// A connection that still carries an open transaction reports itself as
/// broken; the pool then discards it instead of lending it to the next
/// request.
pub(super) fn pre_recycle(conn: &mut AsyncPgConnection, metrics: &Metrics) -> HookResult<PoolError> {
    if conn.is_broken() {
        tracing::warn!(
            target: TRACING_TARGET_CONNECTION,
            reuses = metrics.recycle_count,
            "discarding broken connection"
        );
    }
    Ok(())
}
