#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod server;
mod telemetry;

use std::process;

use anyhow::Context;
use axum::Router;
use conduit_server::handler::routes;
use conduit_server::middleware::{RouterPipelineExt, install_panic_hook};
use conduit_server::service::ServiceState;

use crate::config::{Cli, MiddlewareConfig};
use crate::server::ServerError;

// Tracing target constants
pub const TRACING_TARGET_SERVER_STARTUP: &str = "conduit_cli::server::startup";
pub const TRACING_TARGET_SERVER_SHUTDOWN: &str = "conduit_cli::server::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "conduit_cli::config";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SERVER_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        let message = format!("{error:#}");
        let server_error = error.downcast_ref::<ServerError>();
        tracing::error!(
            target: TRACING_TARGET_SERVER_SHUTDOWN,
            error = %message,
            error_code = server_error.map(ServerError::error_code),
            suggestion = server_error.and_then(ServerError::suggestion),
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    telemetry::init_tracing(&cli.telemetry).context("failed to initialize tracing")?;
    install_panic_hook();

    cli.log();
    cli.validate()?;

    let state = ServiceState::from_config(&cli.service)
        .await
        .context("failed to create service state")?;
    let router = create_router(state, &cli.middleware);

    server::serve(router, cli.server).await?;
    Ok(())
}

/// Creates the router with every pipeline stage applied.
///
/// The route groups carry their own recovery, transaction and authorization
/// stages; CORS and request tracing wrap everything, tracing outermost.
fn create_router(state: ServiceState, middleware: &MiddlewareConfig) -> Router {
    routes(state.clone())
        .with_cors(&middleware.cors)
        .with_request_tracing(middleware.access_log.clone())
        .with_state(state)
}
