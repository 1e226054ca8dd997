//! Extension trait for `axum::Router` to apply the pipeline stages.

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state, map_request};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use super::{
    AccessLogConfig, Authorizer, CorsConfig, MakeTraceId, bind_transaction, create_cors_layer,
    discard_invalid_trace_id, recover, require_authorization, trace_request,
};
use crate::logging::TRACE_ID_HEADER;
use crate::service::Database;

/// Extension trait for `axum::`[`Router`] for layering the pipeline stages.
///
/// The group stages use `route_layer`, so they only wrap matched routes and
/// an unmatched path falls through to the fallback untouched. Within a group
/// the last applied stage runs first; apply them as recovery, transaction,
/// authorization.
pub trait RouterPipelineExt<S> {
    /// Layers the recovery stage around every route of the group.
    fn with_recovery(self) -> Self;

    /// Layers the transaction stage around every route of the group.
    fn with_transaction<D: Database>(self, database: D) -> Self;

    /// Layers the authorization stage around every route of the group.
    fn with_authorization(self, authorizer: Authorizer) -> Self;

    /// Layers CORS handling.
    fn with_cors(self, config: &CorsConfig) -> Self;

    /// Layers request tracing and the access log around the whole router.
    ///
    /// The trace identifier is set on the inbound request and copied to the
    /// response. Apply last so it is the outermost stage.
    fn with_request_tracing(self, config: AccessLogConfig) -> Self;
}

impl<S> RouterPipelineExt<S> for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_recovery(self) -> Self {
        self.route_layer(from_fn(recover))
    }

    fn with_transaction<D: Database>(self, database: D) -> Self {
        self.route_layer(from_fn_with_state(database, bind_transaction::<D>))
    }

    fn with_authorization(self, authorizer: Authorizer) -> Self {
        self.route_layer(from_fn_with_state(authorizer, require_authorization))
    }

    fn with_cors(self, config: &CorsConfig) -> Self {
        self.layer(create_cors_layer(config))
    }

    fn with_request_tracing(self, config: AccessLogConfig) -> Self {
        self.layer(from_fn_with_state(Arc::new(config), trace_request))
            .layer(PropagateRequestIdLayer::new(TRACE_ID_HEADER))
            .layer(SetRequestIdLayer::new(TRACE_ID_HEADER, MakeTraceId))
            .layer(map_request(discard_invalid_trace_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::http::{StatusCode, header};
    use axum::routing::get;
    use axum_test::TestServer;
    use futures::future::join_all;
    use tracing_subscriber::filter::LevelFilter;

    use super::*;
    use crate::handler::Envelope;
    use crate::logging::{RequestContext, TRACE_ID_HEADER};
    use crate::middleware::RejectionPolicy;
    use crate::service::Verification;
    use crate::test_utils::{
        CapturedLogs, LOGGER_LOCK, MockDatabase, ScriptedVerifier, alice, trace_ids,
    };

    #[tokio::test]
    async fn legacy_rejection_stops_before_the_transaction() -> anyhow::Result<()> {
        let invoked = Arc::new(AtomicBool::new(false));
        let handler = {
            let invoked = Arc::clone(&invoked);
            move || async move {
                invoked.store(true, Ordering::SeqCst);
                Envelope::ok(())
            }
        };

        let database = MockDatabase::new();
        let authorizer = Authorizer::new(
            Arc::new(ScriptedVerifier::new(Verification::Malformed)),
            RejectionPolicy::Legacy,
        );
        let router = Router::new()
            .route("/", get(handler))
            .with_recovery()
            .with_transaction(database.clone())
            .with_authorization(authorizer)
            .with_request_tracing(AccessLogConfig::default());

        let response = TestServer::new(router)?
            .get("/")
            .add_header(header::AUTHORIZATION, "Bearer abc")
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = response.json::<Envelope>();
        assert_eq!(envelope.code, 2);
        assert_eq!(envelope.message, "token malformed");
        assert!(!invoked.load(Ordering::SeqCst));
        assert_eq!(database.begun(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn authorized_principal_reaches_the_context() -> anyhow::Result<()> {
        async fn whoami(context: RequestContext) -> Envelope<String> {
            let name = context.principal().map(|p| p.name.clone());
            Envelope::ok(name.unwrap_or_default())
        }

        let database = MockDatabase::new();
        let authorizer = Authorizer::new(
            Arc::new(ScriptedVerifier::new(Verification::Valid(alice()))),
            RejectionPolicy::default(),
        );
        let router = Router::new()
            .route("/", get(whoami))
            .with_recovery()
            .with_transaction(database.clone())
            .with_authorization(authorizer)
            .with_request_tracing(AccessLogConfig::default());

        let response = TestServer::new(router)?
            .get("/")
            .add_header(header::AUTHORIZATION, "Bearer abc")
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.json::<Envelope<String>>().data.as_deref(),
            Some("alice")
        );
        assert_eq!(database.committed(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_never_mix_trace_ids() -> anyhow::Result<()> {
        async fn traced(context: RequestContext) -> Envelope<String> {
            tracing::info!("handling");
            tokio::task::yield_now().await;
            context.logger().in_scope(|| tracing::info!("handled"));
            Envelope::ok(context.trace_id().to_string())
        }

        let _serial = LOGGER_LOCK.lock().await;
        let logs = CapturedLogs::new();
        let _restore = logs.install();

        let database = MockDatabase::new();
        let router = Router::new()
            .route("/", get(traced))
            .with_recovery()
            .with_transaction(database.clone())
            .with_request_tracing(AccessLogConfig::default());
        let server = TestServer::new(router)?;

        let ids: Vec<String> = (0..16).map(|i| format!("trace-{i}")).collect();
        let requests = ids.iter().map(|id| {
            server
                .get("/")
                .add_header(TRACE_ID_HEADER, id.as_str())
                .into_future()
        });
        let responses = join_all(requests).await;

        for (id, response) in ids.iter().zip(&responses) {
            assert_eq!(response.header(TRACE_ID_HEADER), id.as_str());
            assert_eq!(
                response.json::<Envelope<String>>().data.as_deref(),
                Some(id.as_str())
            );
        }

        // Other tests may log through the captured logger concurrently.
        for message in ["handling", "handled", "request completed"] {
            let mut seen: Vec<String> = Vec::new();
            for line in logs.with_message(message) {
                let recorded = trace_ids(&line);
                let Some(first) = recorded.first() else {
                    continue;
                };
                if !ids.contains(first) {
                    continue;
                }

                assert!(recorded.iter().all(|id| id == first), "{line}");
                seen.push(first.clone());
            }

            seen.sort();
            let mut expected = ids.clone();
            expected.sort();
            assert_eq!(seen, expected, "{message}");
        }

        assert_eq!(database.committed(), ids.len());
        Ok(())
    }

    #[tokio::test]
    async fn recovered_panic_keeps_its_trace_id_under_a_warn_filter() -> anyhow::Result<()> {
        async fn explode() -> Envelope<()> {
            panic!("handler exploded");
        }

        let _serial = LOGGER_LOCK.lock().await;
        let logs = CapturedLogs::new();
        let _restore = logs.install_with_level(LevelFilter::WARN);

        let router = Router::new()
            .route("/", get(explode))
            .with_recovery()
            .with_request_tracing(AccessLogConfig::default());
        let response = TestServer::new(router)?
            .get("/")
            .add_header(TRACE_ID_HEADER, "panic-trace")
            .await;

        response.assert_status_ok();
        assert_eq!(response.json::<Envelope>().code, 100);
        assert_eq!(response.header(TRACE_ID_HEADER), "panic-trace");

        let ours = |message: &str| -> Vec<serde_json::Value> {
            logs.with_message(message)
                .into_iter()
                .filter(|line| trace_ids(line).iter().any(|id| id == "panic-trace"))
                .collect()
        };

        let recovered = ours("recovered from panic");
        assert_eq!(recovered.len(), 1);
        let line = &recovered[0];
        assert_eq!(line["level"], "ERROR");
        assert_eq!(line["fields"]["panic"], "handler exploded");
        assert_eq!(line["fields"]["code"], 100);

        let backtrace = line["fields"]["backtrace"].as_str().unwrap_or_default();
        assert!(!backtrace.is_empty());
        assert!(!backtrace.contains("disabled"), "{backtrace}");

        // The 200 access line is below the filter.
        assert!(ours("request completed").is_empty());
        Ok(())
    }
}
