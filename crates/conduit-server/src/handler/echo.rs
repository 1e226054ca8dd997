//! Utility handlers.

use axum::Router;
use axum::routing::get;

use super::Envelope;
use super::request::EchoQuery;
use crate::extract::Query;
use crate::logging::RequestContext;
use crate::{ErrorKind, Result};

/// Tracing target for utility handlers.
const TRACING_TARGET: &str = "conduit_server::handler::echo";

/// Echoes the `input` query parameter back.
async fn echo(context: RequestContext, Query(query): Query<EchoQuery>) -> Result<Envelope<String>> {
    let input = query
        .input
        .ok_or_else(|| ErrorKind::Input.with_context("missing query parameter `input`"))?;

    context.logger().in_scope(|| {
        tracing::debug!(target: TRACING_TARGET, len = input.len(), "echo");
    });

    Ok(Envelope::ok(input))
}

/// Returns a [`Router`] with the utility routes.
pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/echo", get(echo))
}
