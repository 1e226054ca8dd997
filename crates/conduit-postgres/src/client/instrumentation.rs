//! Statement logging for pooled connections.

use std::time::{Duration, Instant};

use diesel::connection::{Instrumentation, InstrumentationEvent};
use diesel::result::Error as DieselError;

use crate::TRACING_TARGET_QUERY;

/// How a finished statement is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Slow,
    Failed,
}

fn outcome(elapsed: Duration, slow_query: Duration, failed: bool) -> Outcome {
    if failed {
        Outcome::Failed
    } else if elapsed >= slow_query {
        Outcome::Slow
    } else {
        Outcome::Done
    }
}

/// Drops the bind values diesel appends to a rendered statement.
fn statement_text(rendered: &str) -> &str {
    rendered
        .split_once(" -- binds:")
        .map_or(rendered, |(sql, _)| sql)
}

/// Logs every statement a connection runs, with its duration.
///
/// Failures log at `ERROR` and statements at or above the slow threshold at
/// `WARN`; the rest log at `DEBUG`.
#[derive(Debug)]
pub(super) struct QueryLogger {
    slow_query: Duration,
    started: Option<Instant>,
}

impl QueryLogger {
    pub(super) fn new(slow_query: Duration) -> Self {
        Self {
            slow_query,
            started: None,
        }
    }

    fn finish(&mut self, rendered: &str, error: Option<&DieselError>) {
        let elapsed = self.started.take().map(|at| at.elapsed()).unwrap_or_default();
        let elapsed_ms = elapsed.as_millis() as u64;
        let sql = statement_text(rendered);

        match (outcome(elapsed, self.slow_query, error.is_some()), error) {
            (Outcome::Failed, Some(error)) => tracing::error!(
                target: TRACING_TARGET_QUERY,
                sql,
                elapsed_ms,
                error = %error,
                "query failed"
            ),
            (Outcome::Slow, _) => tracing::warn!(
                target: TRACING_TARGET_QUERY,
                sql,
                elapsed_ms,
                slow_query_ms = self.slow_query.as_millis() as u64,
                "slow query"
            ),
            _ => tracing::debug!(target: TRACING_TARGET_QUERY, sql, elapsed_ms, "query finished"),
        }
    }
}

impl Instrumentation for QueryLogger {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartQuery { .. } => self.started = Some(Instant::now()),
            InstrumentationEvent::FinishQuery { query, error, .. } => {
                self.finish(&query.to_string(), error);
            }
            _ => {}
        }
    }
}
