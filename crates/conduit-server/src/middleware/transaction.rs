//! Request-scoped database transactions.
//!
//! The stage begins one transaction before the handler runs, exposes it as a
//! [`Tx`] extension and resolves it exactly once when the final response is
//! known:
//!
//! | outcome                                   | resolution |
//! |-------------------------------------------|------------|
//! | handler panicked past the recovery stage  | rollback, then the panic resumes |
//! | recovery stage rendered an error or panic | rollback   |
//! | status `>= 500`                           | rollback   |
//! | status `200` or `201`                     | commit     |
//! | any other status                          | rollback   |
//!
//! A committing response whose body is streamed defers the commit until the
//! body finished. A body that fails or is dropped early rolls back instead.
//!
//! Commit and rollback failures are logged; the response is already decided
//! and stays untouched.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use futures::{FutureExt, StreamExt, stream};
use tokio::runtime::Handle;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::Dispatch;
use tracing::instrument::WithSubscriber;

use super::recovery::{RecoveryOutcome, recovered_response};
use crate::logging::{self, ContextLogger, logger_for};
use crate::service::{Database, Transaction};
use crate::{Error, ErrorKind, Result};

/// Tracing target for the transaction stage.
const TRACING_TARGET: &str = "conduit_server::middleware::transaction";

/// Observable lifecycle of a request transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction was bound to the request.
    NotStarted,
    /// The transaction is open and usable.
    Open,
    /// The transaction was committed.
    Committed,
    /// The transaction was rolled back.
    RolledBack,
}

enum Slot<T> {
    Open(T),
    Committed,
    RolledBack,
}

/// Handle to the transaction bound to the current request.
///
/// Handlers obtain it as an extractor and never open transactions of their
/// own. Clones share the same transaction.
pub struct Tx<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Clone for Tx<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Tx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx").finish_non_exhaustive()
    }
}

impl<T: Transaction> Tx<T> {
    fn open(transaction: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Open(transaction))),
        }
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> TransactionState {
        match &*self.slot.lock().await {
            Slot::Open(_) => TransactionState::Open,
            Slot::Committed => TransactionState::Committed,
            Slot::RolledBack => TransactionState::RolledBack,
        }
    }

    /// Locks the open transaction for use.
    ///
    /// Fails with a `Database` error once the transaction was resolved.
    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, T>> {
        let guard = self.slot.lock().await;
        MutexGuard::try_map(guard, |slot| match slot {
            Slot::Open(transaction) => Some(transaction),
            Slot::Committed | Slot::RolledBack => None,
        })
        .map_err(|_| ErrorKind::Database.with_context("transaction is already closed"))
    }

    /// Takes the transaction out, leaving `resolved` behind.
    async fn take(&self, resolved: Slot<T>) -> Option<T> {
        let mut slot = self.slot.lock().await;
        match std::mem::replace(&mut *slot, resolved) {
            Slot::Open(transaction) => Some(transaction),
            previous => {
                *slot = previous;
                None
            }
        }
    }

    async fn commit(&self, logger: &ContextLogger) {
        let Some(transaction) = self.take(Slot::Committed).await else {
            return;
        };

        match logger.instrument(transaction.commit()).await {
            Ok(()) => logger.in_scope(|| {
                tracing::debug!(target: TRACING_TARGET, "transaction committed");
            }),
            Err(error) => logger.in_scope(|| {
                tracing::error!(
                    target: TRACING_TARGET,
                    error = %error,
                    "transaction commit failed"
                );
            }),
        }
    }

    async fn rollback(&self, logger: &ContextLogger, reason: &'static str) {
        let Some(transaction) = self.take(Slot::RolledBack).await else {
            return;
        };

        match logger.instrument(transaction.rollback()).await {
            Ok(()) => logger.in_scope(|| {
                tracing::debug!(target: TRACING_TARGET, reason, "transaction rolled back");
            }),
            Err(error) => logger.in_scope(|| {
                tracing::error!(
                    target: TRACING_TARGET,
                    reason,
                    error = %error,
                    "transaction rollback failed"
                );
            }),
        }
    }
}

impl<S, T> FromRequestParts<S> for Tx<T>
where
    S: Send + Sync,
    T: Transaction,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| ErrorKind::Database.with_context("no transaction is bound to the request"))
    }
}

/// Returns the state of the transaction bound to a response's request.
///
/// Reads the handle the stage leaves on the response; `NotStarted` when the
/// stage did not run.
pub async fn transaction_state<T: Transaction>(response: &Response) -> TransactionState {
    match response.extensions().get::<Tx<T>>() {
        Some(tx) => tx.state().await,
        None => TransactionState::NotStarted,
    }
}

enum Resolution {
    Commit,
    Rollback(&'static str),
}

fn resolve(response: &Response) -> Resolution {
    let recovered = response
        .extensions()
        .get::<RecoveryOutcome>()
        .is_some_and(|outcome| outcome.is_recovered());

    match response.status() {
        _ if recovered => Resolution::Rollback("request failed"),
        status if status.is_server_error() => Resolution::Rollback("server error"),
        StatusCode::OK | StatusCode::CREATED => Resolution::Commit,
        _ => Resolution::Rollback("unsuccessful status"),
    }
}

/// Commit held back until a streamed response body completed.
struct PendingCommit<T: Transaction> {
    tx: Tx<T>,
    logger: ContextLogger,
    dispatch: Dispatch,
    settled: bool,
}

impl<T: Transaction> PendingCommit<T> {
    fn new(tx: Tx<T>, logger: ContextLogger) -> Self {
        Self {
            tx,
            logger,
            dispatch: logging::current(),
            settled: false,
        }
    }

    async fn commit(mut self) {
        self.settled = true;
        let dispatch = self.dispatch.clone();
        self.tx.commit(&self.logger).with_subscriber(dispatch).await;
    }

    async fn rollback(mut self, reason: &'static str) {
        self.settled = true;
        let dispatch = self.dispatch.clone();
        self.tx.rollback(&self.logger, reason).with_subscriber(dispatch).await;
    }
}

impl<T: Transaction> Drop for PendingCommit<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        // The body was dropped before its end, e.g. the client went away.
        let tx = self.tx.clone();
        let logger = self.logger.clone();
        if let Ok(handle) = Handle::try_current() {
            let rollback = async move { tx.rollback(&logger, "response body dropped").await };
            handle.spawn(rollback.with_subscriber(self.dispatch.clone()));
        }
    }
}

/// Wraps `body` so the transaction resolves when the body ends.
fn commit_after_body<T: Transaction>(body: Body, pending: PendingCommit<T>) -> Body {
    let chunks = stream::unfold(
        (body.into_data_stream(), Some(pending)),
        |(mut data, mut pending)| async move {
            match data.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), (data, pending))),
                Some(Err(error)) => {
                    if let Some(pending) = pending.take() {
                        pending.rollback("response body failed").await;
                    }
                    Some((Err(error), (data, None)))
                }
                None => {
                    if let Some(pending) = pending.take() {
                        pending.commit().await;
                    }
                    None
                }
            }
        },
    );

    Body::from_stream(chunks)
}

/// Transaction middleware; see the module documentation.
pub async fn bind_transaction<D: Database>(
    State(database): State<D>,
    mut request: Request,
    next: Next,
) -> Response {
    let logger = logger_for(&mut request, "tx");

    let tx = match logger.instrument(database.begin()).await {
        Ok(transaction) => Tx::open(transaction),
        Err(error) => {
            logger.in_scope(|| {
                tracing::error!(
                    target: TRACING_TARGET,
                    error = %error,
                    "failed to begin transaction"
                );
            });
            let error = Error::wrap(ErrorKind::Database, error, "couldn't begin transaction");
            return recovered_response(&error, false);
        }
    };

    request.extensions_mut().insert(tx.clone());

    let mut response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            tx.rollback(&logger, "panic").await;
            std::panic::resume_unwind(payload);
        }
    };

    let streamed = response.body().size_hint().exact().is_none();
    match resolve(&response) {
        Resolution::Commit if streamed => {
            let pending = PendingCommit::new(tx.clone(), logger);
            response = response.map(|body| commit_after_body(body, pending));
        }
        Resolution::Commit => tx.commit(&logger).await,
        Resolution::Rollback(reason) => tx.rollback(&logger, reason).await,
    }

    response.extensions_mut().insert(tx);
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::Router;
    use axum::body::Bytes;
    use axum::routing::{get, post};
    use axum_test::TestServer;
    use tower::ServiceExt;

    use super::*;
    use crate::handler::Envelope;
    use crate::logging::TRACE_ID_HEADER;
    use crate::middleware::{AccessLogConfig, RouterPipelineExt};
    use crate::test_utils::{CapturedLogs, LOGGER_LOCK, MockDatabase, MockTransaction, trace_ids};

    async fn created(tx: Tx<MockTransaction>) -> Envelope<&'static str> {
        assert_eq!(tx.state().await, TransactionState::Open);
        Envelope::created("stored")
    }

    async fn failed() -> Result<Envelope<()>> {
        Err(ErrorKind::Input.with_context("name is required"))
    }

    async fn panicked() -> Envelope<()> {
        panic!("handler exploded");
    }

    async fn rejected() -> (StatusCode, &'static str) {
        (StatusCode::CONFLICT, "conflict")
    }

    fn server(database: &MockDatabase) -> anyhow::Result<TestServer> {
        let router = Router::new()
            .route("/created", post(created))
            .route("/failed", get(failed))
            .route("/panicked", get(panicked))
            .route("/rejected", get(rejected))
            .with_recovery()
            .with_transaction(database.clone());
        Ok(TestServer::new(router)?)
    }

    #[tokio::test]
    async fn created_response_commits_once() -> anyhow::Result<()> {
        let database = MockDatabase::new();
        let response = server(&database)?.post("/created").await;

        response.assert_status(StatusCode::CREATED);
        assert_eq!(response.json::<Envelope<String>>().code, 0);
        assert_eq!(database.begun(), 1);
        assert_eq!(database.committed(), 1);
        assert_eq!(database.rolled_back(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn returned_error_rolls_back() -> anyhow::Result<()> {
        let database = MockDatabase::new();
        let response = server(&database)?.get("/failed").await;

        response.assert_status_ok();
        let envelope = response.json::<Envelope>();
        assert_eq!(envelope.code, 1);
        assert_eq!(envelope.message, "name is required");
        assert_eq!(database.committed(), 0);
        assert_eq!(database.rolled_back(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn panic_rolls_back_once() -> anyhow::Result<()> {
        let database = MockDatabase::new();
        let response = server(&database)?.get("/panicked").await;

        response.assert_status_ok();
        let envelope = response.json::<Envelope>();
        assert_eq!(envelope.code, 100);
        assert_eq!(envelope.message, "Unknown error");
        assert_eq!(envelope.data, None);
        assert_eq!(database.committed(), 0);
        assert_eq!(database.rolled_back(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn client_error_status_rolls_back() -> anyhow::Result<()> {
        let database = MockDatabase::new();
        let response = server(&database)?.get("/rejected").await;

        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(database.committed(), 0);
        assert_eq!(database.rolled_back(), 1);
        Ok(())
    }

    fn streamed(fail_at: Option<usize>) -> Response {
        let chunks = stream::iter(0..3).map(move |i| {
            if Some(i) == fail_at {
                panic!("stream broke at chunk {i}");
            }
            Ok::<_, std::io::Error>(Bytes::from(format!("chunk-{i};")))
        });
        Response::new(Body::from_stream(chunks))
    }

    fn streaming_router(database: &MockDatabase, fail_at: Option<usize>) -> Router {
        Router::new()
            .route("/", get(move || async move { streamed(fail_at) }))
            .with_recovery()
            .with_transaction(database.clone())
    }

    #[tokio::test]
    async fn streamed_body_commits_after_its_end() -> anyhow::Result<()> {
        let database = MockDatabase::new();
        let request = axum::http::Request::get("/").body(Body::empty())?;
        let response = streaming_router(&database, None).oneshot(request).await?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(database.committed(), 0);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"chunk-0;chunk-1;chunk-2;");
        assert_eq!(database.committed(), 1);
        assert_eq!(database.rolled_back(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failing_stream_rolls_back() -> anyhow::Result<()> {
        let database = MockDatabase::new();
        let request = axum::http::Request::get("/").body(Body::empty())?;
        let response = streaming_router(&database, Some(1)).oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(body.is_err());
        assert_eq!(database.committed(), 0);
        assert_eq!(database.rolled_back(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_stream_rolls_back() -> anyhow::Result<()> {
        let database = MockDatabase::new();
        let request = axum::http::Request::get("/").body(Body::empty())?;
        let response = streaming_router(&database, None).oneshot(request).await?;
        drop(response);

        for _ in 0..50 {
            if database.rolled_back() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(database.committed(), 0);
        assert_eq!(database.rolled_back(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn commit_failure_keeps_the_response() -> anyhow::Result<()> {
        let _serial = LOGGER_LOCK.lock().await;
        let logs = CapturedLogs::new();
        let _restore = logs.install();

        let database = MockDatabase::failing_commit();
        let router = Router::new()
            .route("/created", post(created))
            .with_recovery()
            .with_transaction(database.clone())
            .with_request_tracing(AccessLogConfig::default());
        let response = TestServer::new(router)?
            .post("/created")
            .add_header(TRACE_ID_HEADER, "commit-trace")
            .await;

        response.assert_status(StatusCode::CREATED);
        let envelope = response.json::<Envelope<String>>();
        assert_eq!(envelope.code, 0);
        assert_eq!(envelope.data.as_deref(), Some("stored"));
        assert_eq!(database.committed(), 0);
        assert_eq!(database.rolled_back(), 0);

        let failures: Vec<_> = logs
            .with_message("transaction commit failed")
            .into_iter()
            .filter(|line| trace_ids(line).iter().any(|id| id == "commit-trace"))
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["level"], "ERROR");
        assert_eq!(failures[0]["fields"]["error"], "commit refused");
        Ok(())
    }

    #[tokio::test]
    async fn begin_failure_skips_the_handler() -> anyhow::Result<()> {
        let invoked = Arc::new(AtomicBool::new(false));
        let handler = {
            let invoked = Arc::clone(&invoked);
            move || async move {
                invoked.store(true, Ordering::SeqCst);
                Envelope::ok(())
            }
        };

        let database = MockDatabase::unavailable();
        let router = Router::new()
            .route("/", get(handler))
            .with_recovery()
            .with_transaction(database.clone());
        let response = TestServer::new(router)?.get("/").await;

        response.assert_status_ok();
        let envelope = response.json::<Envelope>();
        assert_eq!(envelope.code, 3);
        assert_eq!(
            envelope.message,
            "couldn't begin transaction: connection refused"
        );
        assert!(!invoked.load(Ordering::SeqCst));
        assert_eq!(database.begun(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn resolved_transaction_is_closed() -> anyhow::Result<()> {
        let database = MockDatabase::new();
        let tx = Tx::open(database.begin().await?);
        let logger = ContextLogger::new(crate::logging::TraceId::generate());

        tx.commit(&logger).await;
        assert_eq!(tx.state().await, TransactionState::Committed);
        assert!(tx.lock().await.is_err());

        tx.rollback(&logger, "late").await;
        assert_eq!(tx.state().await, TransactionState::Committed);
        assert_eq!(database.committed(), 1);
        assert_eq!(database.rolled_back(), 0);
        Ok(())
    }
}
