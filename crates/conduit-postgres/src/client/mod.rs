//! Pooled client, its settings and embedded migrations.

mod custom_hooks;
mod instrumentation;
mod migrate;
mod pg_client;
mod pg_config;

pub use migrate::{MigrationReport, run_pending_migrations};
pub use pg_client::{PgClient, PgConn, PoolStatus};
pub use pg_config::{PgConfig, RedactedUrl};
