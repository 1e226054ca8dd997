use std::time::{Duration, Instant};

use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_migrations::MigrationHarness;
use tokio::task::spawn_blocking;

use crate::{MIGRATIONS, PgClient, PgError, PgResult, TRACING_TARGET_MIGRATION};

/// What a migration run changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Applied versions, oldest first.
    pub applied: Vec<String>,
    pub took: Duration,
}

/// Applies the embedded migrations that the database has not seen yet.
///
/// The diesel harness is blocking, so it runs on the blocking pool over one
/// connection taken out of the async pool.
pub async fn run_pending_migrations(client: &PgClient) -> PgResult<MigrationReport> {
    let started = Instant::now();
    let conn = client.get_connection().await?.into_object();
    let mut conn: AsyncConnectionWrapper<_> = conn.into();

    let applied = spawn_blocking(move || {
        conn.run_pending_migrations(MIGRATIONS)
            .map(|versions| versions.iter().map(ToString::to_string).collect::<Vec<_>>())
    })
    .await
    .map_err(|err| PgError::Migration(Box::new(err)))?
    .map_err(PgError::Migration)?;

    let report = MigrationReport {
        applied,
        took: started.elapsed(),
    };

    tracing::info!(
        target: TRACING_TARGET_MIGRATION,
        applied = ?report.applied,
        took_ms = report.took.as_millis() as u64,
        "schema migrated"
    );
    Ok(report)
}
