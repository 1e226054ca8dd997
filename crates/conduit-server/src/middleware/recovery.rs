//! Panic and error recovery.
//!
//! The innermost stage of every route group. It turns whatever the handler
//! produced into a response envelope:
//!
//! - an error returned by the handler (a response carrying a [`Failure`]) is
//!   logged with its cause chain and rendered as a `200` envelope with the
//!   error's code;
//! - a panic is caught, logged with its location and a backtrace, classified
//!   and rendered the same way;
//! - anything else passes through untouched.
//!
//! Each response leaves with a [`RecoveryOutcome`] extension the transaction
//! stage decides on.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::error::Error as StdError;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::{FutureExt, StreamExt};

use crate::handler::Envelope;
use crate::logging::{self, ContextLogger, logger_for};
use crate::{Error, classify_panic, panic_message};

/// Tracing target for error recovery.
const TRACING_TARGET: &str = "conduit_server::middleware::recovery";

/// A handler error waiting to be rendered.
///
/// Inserted into the response extensions by [`Error`]'s response conversion.
#[derive(Debug, Clone)]
pub struct Failure(pub Error);

/// How the recovery stage finished a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The handler returned a response on its own.
    Completed,
    /// An error or panic was caught and rendered as an envelope.
    Recovered {
        /// Code of the rendered envelope.
        code: i32,
        /// Whether the handler panicked.
        panicked: bool,
    },
}

impl RecoveryOutcome {
    /// Returns whether an error or panic was caught.
    #[inline]
    pub fn is_recovered(self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// Where and how a panic happened, recorded by the panic hook.
struct PanicReport {
    location: Option<String>,
    backtrace: Backtrace,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

/// Installs a panic hook that records the location and backtrace of every
/// panic for the recovery stage, then defers to the previous hook.
///
/// Idempotent. Without the hook, recovery still works but can only capture
/// a backtrace of the catch site.
pub fn install_panic_hook() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let report = PanicReport {
                location: info.location().map(ToString::to_string),
                backtrace: Backtrace::force_capture(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(report));
            previous(info);
        }));
    });
}

fn take_panic_report() -> PanicReport {
    LAST_PANIC
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| PanicReport {
            location: None,
            backtrace: Backtrace::force_capture(),
        })
}

/// Recovery middleware; see the module documentation.
pub async fn recover(mut request: Request, next: Next) -> Response {
    let logger = logger_for(&mut request, "recovery");

    let result = FutureExt::catch_unwind(AssertUnwindSafe(next.run(request))).await;
    let mut response = match result {
        Ok(response) => response,
        Err(payload) => return recover_panic(&logger, payload.as_ref()),
    };

    if response.extensions().get::<RecoveryOutcome>().is_some() {
        return response;
    }

    match response.extensions_mut().remove::<Failure>() {
        Some(Failure(error)) => recover_error(&logger, &error),
        None => {
            let mut response = guard_streaming_body(response, &logger);
            response.extensions_mut().insert(RecoveryOutcome::Completed);
            response
        }
    }
}

fn recover_error(logger: &ContextLogger, error: &Error) -> Response {
    logger.in_scope(|| {
        tracing::error!(
            target: TRACING_TARGET,
            code = error.code(),
            error = %error,
            causes = ?cause_chain(error),
            "request failed"
        );
    });

    recovered_response(error, false)
}

fn recover_panic(logger: &ContextLogger, payload: &(dyn Any + Send)) -> Response {
    let error = classify_panic(payload);
    let report = take_panic_report();

    logger.in_scope(|| {
        tracing::error!(
            target: TRACING_TARGET,
            code = error.code(),
            panic = %panic_message(payload),
            location = report.location.as_deref().unwrap_or("unknown"),
            backtrace = %report.backtrace,
            "recovered from panic"
        );
    });

    recovered_response(&error, true)
}

/// Renders `error` as a `200` envelope marked as recovered.
pub(crate) fn recovered_response(error: &Error, panicked: bool) -> Response {
    let mut response = Envelope::<()>::failure(error).into_response();
    response.extensions_mut().insert(RecoveryOutcome::Recovered {
        code: error.code(),
        panicked,
    });
    response
}

fn cause_chain(error: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}

/// Raised into a streaming body that panicked after the response started.
#[derive(Debug)]
struct CommittedPanic(String);

impl fmt::Display for CommittedPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "response body panicked: {}", self.0)
    }
}

impl StdError for CommittedPanic {}

/// Guards a body that is produced while it is being sent.
///
/// Once the head of the response is out, a second body cannot be written. A
/// panic while streaming only logs a warning and ends the stream with an
/// error, which makes the server abort the connection.
fn guard_streaming_body(response: Response, logger: &ContextLogger) -> Response {
    if response.body().size_hint().exact().is_some() {
        return response;
    }

    let dispatch = logging::current();
    let span = logger.span().clone();
    let (parts, body) = response.into_parts();

    let stream = StreamExt::catch_unwind(AssertUnwindSafe(body.into_data_stream())).map(
        move |chunk| match chunk {
            Ok(chunk) => chunk,
            Err(payload) => {
                let message = panic_message(payload.as_ref()).to_owned();
                let report = take_panic_report();

                tracing::dispatcher::with_default(&dispatch, || {
                    span.in_scope(|| {
                        tracing::warn!(
                            target: TRACING_TARGET,
                            panic = %message,
                            location = report.location.as_deref().unwrap_or("unknown"),
                            "response already committed"
                        );
                    });
                });

                Err(axum::Error::new(CommittedPanic(message)))
            }
        },
    );

    Response::from_parts(parts, Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum_test::TestServer;

    use super::*;
    use crate::{ErrorKind, Result};

    fn server(router: Router) -> anyhow::Result<TestServer> {
        Ok(TestServer::new(router.route_layer(from_fn(recover)))?)
    }

    #[tokio::test]
    async fn string_panic_becomes_unknown_envelope() -> anyhow::Result<()> {
        install_panic_hook();
        let server = server(Router::new().route(
            "/",
            get(|| async {
                if true {
                    panic!("boom");
                }
                "unreachable"
            }),
        ))?;

        let response = server.get("/").await;
        response.assert_status(StatusCode::OK);

        let envelope = response.json::<Envelope>();
        assert_eq!(envelope.code, 100);
        assert_eq!(envelope.message, "Unknown error");
        assert_eq!(envelope.data, None);
        Ok(())
    }

    #[tokio::test]
    async fn coded_panic_keeps_its_code() -> anyhow::Result<()> {
        let server = server(Router::new().route(
            "/",
            get(|| async {
                if true {
                    std::panic::panic_any(ErrorKind::NotFound.with_context("user 3"));
                }
                "unreachable"
            }),
        ))?;

        let envelope = server.get("/").await.json::<Envelope>();
        assert_eq!(envelope.code, 4);
        assert_eq!(envelope.message, "user 3");
        Ok(())
    }

    #[tokio::test]
    async fn returned_error_is_rendered_with_context_chain() -> anyhow::Result<()> {
        async fn handler() -> Result<String> {
            Err(ErrorKind::Database
                .with_context("connection reset")
                .context("loading user"))
        }

        let server = server(Router::new().route("/", get(handler)))?;
        let response = server.get("/").await;
        response.assert_status(StatusCode::OK);

        let envelope = response.json::<Envelope>();
        assert_eq!(envelope.code, 3);
        assert_eq!(envelope.message, "loading user: connection reset");
        Ok(())
    }

    #[tokio::test]
    async fn successful_responses_pass_through() -> anyhow::Result<()> {
        let server = server(Router::new().route(
            "/",
            get(|| async { Envelope::created(serde_json::json!("made")) }),
        ))?;

        let response = server.get("/").await;
        response.assert_status(StatusCode::CREATED);
        assert_eq!(response.json::<Envelope>().code, 0);
        Ok(())
    }

    #[tokio::test]
    async fn streaming_panic_never_writes_a_second_body() -> anyhow::Result<()> {
        let stream = futures::stream::iter(0..3).map(|i| {
            if i == 1 {
                panic!("mid-stream");
            }
            Ok::<_, std::io::Error>(format!("chunk-{i}"))
        });
        let response = Response::new(Body::from_stream(stream));

        let logger = ContextLogger::new(crate::logging::TraceId::generate());
        let guarded = guard_streaming_body(response, &logger);
        assert_eq!(guarded.status(), StatusCode::OK);

        let collected = axum::body::to_bytes(guarded.into_body(), usize::MAX).await;
        assert!(collected.is_err());
        Ok(())
    }

    #[test]
    fn outcome_reports_recovery() {
        assert!(!RecoveryOutcome::Completed.is_recovered());
        assert!(
            RecoveryOutcome::Recovered {
                code: 1,
                panicked: false
            }
            .is_recovered()
        );
    }
}
