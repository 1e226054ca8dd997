//! Request pipeline stages for `axum::Router`.
//!
//! Every request passes through the stages in a fixed order:
//!
//! 1. request tracing (outermost, see [`trace_request`]);
//! 2. CORS;
//! 3. authorization, on protected route groups only ([`require_authorization`]);
//! 4. transaction ([`bind_transaction`]);
//! 5. recovery (innermost, see [`recover`]);
//! 6. the route handler.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use axum::Router;
//! use axum::routing::get;
//! use conduit_server::middleware::{AccessLogConfig, Authorizer, RouterPipelineExt};
//! use conduit_server::service::ServiceState;
//!
//! # fn example(state: ServiceState) {
//! let protected: Router<ServiceState> = Router::new()
//!     .route("/me", get(|| async { "me" }))
//!     .with_recovery()
//!     .with_transaction(state.postgres.clone())
//!     .with_authorization(state.authorizer.clone());
//!
//! let app: Router = protected
//!     .with_request_tracing(AccessLogConfig::default())
//!     .with_state(state);
//! # }
//! ```

mod authorization;
mod extensions;
mod observability;
mod recovery;
mod security;
mod transaction;

pub use authorization::{Authorizer, Rejection, RejectionPolicy, require_authorization};
pub use extensions::RouterPipelineExt;
pub use observability::{AccessLogConfig, MakeTraceId, discard_invalid_trace_id, trace_request};
pub use recovery::{Failure, RecoveryOutcome, install_panic_hook, recover};
pub use security::{CorsConfig, create_cors_layer};
pub use transaction::{Tx, TransactionState, bind_transaction, transaction_state};
