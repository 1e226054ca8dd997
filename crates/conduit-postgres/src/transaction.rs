//! Request-scoped database transactions.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use diesel_async::{AnsiTransactionManager, AsyncPgConnection, TransactionManager};

use crate::{PgClient, PgConn, PgError, PgResult, TRACING_TARGET_TRANSACTION};

/// An open transaction that owns its pooled connection.
///
/// Unlike [`AsyncConnection::transaction`], the scope is not a closure: the
/// transaction is opened with [`begin`], handed around, and closed exactly
/// once with [`commit`] or [`rollback`]. Both consume `self`.
///
/// Dropping an unresolved transaction returns a connection that still has an
/// open transaction; the pool sees it as broken and discards it.
///
/// [`AsyncConnection::transaction`]: diesel_async::AsyncConnection::transaction
/// [`begin`]: PgTransaction::begin
/// [`commit`]: PgTransaction::commit
/// [`rollback`]: PgTransaction::rollback
pub struct PgTransaction {
    conn: PgConn,
    started_at: Instant,
    resolved: bool,
}

impl PgTransaction {
    /// Borrows a connection from the pool and issues `BEGIN`.
    pub async fn begin(client: &PgClient) -> PgResult<Self> {
        let conn = client.get_connection().await?;
        Self::begin_on(conn).await
    }

    /// Issues `BEGIN` on an already borrowed connection.
    pub async fn begin_on(mut conn: PgConn) -> PgResult<Self> {
        AnsiTransactionManager::begin_transaction(&mut **conn)
            .await
            .map_err(|err| {
                tracing::error!(
                    target: TRACING_TARGET_TRANSACTION,
                    error = %err,
                    "failed to begin transaction"
                );
                PgError::from(err)
            })?;

        tracing::debug!(target: TRACING_TARGET_TRANSACTION, "transaction started");
        Ok(Self {
            conn,
            started_at: Instant::now(),
            resolved: false,
        })
    }

    /// Returns the connection the transaction runs on.
    #[inline]
    pub fn connection(&mut self) -> &mut AsyncPgConnection {
        &mut self.conn
    }

    /// Issues `COMMIT`.
    pub async fn commit(mut self) -> PgResult<()> {
        self.resolved = true;
        AnsiTransactionManager::commit_transaction(&mut **self.conn)
            .await
            .map_err(PgError::from)?;

        tracing::debug!(
            target: TRACING_TARGET_TRANSACTION,
            elapsed = ?self.started_at.elapsed(),
            "transaction committed"
        );
        Ok(())
    }

    /// Issues `ROLLBACK`.
    pub async fn rollback(mut self) -> PgResult<()> {
        self.resolved = true;
        AnsiTransactionManager::rollback_transaction(&mut **self.conn)
            .await
            .map_err(PgError::from)?;

        tracing::debug!(
            target: TRACING_TARGET_TRANSACTION,
            elapsed = ?self.started_at.elapsed(),
            "transaction rolled back"
        );
        Ok(())
    }
}

impl Deref for PgTransaction {
    type Target = AsyncPgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PgTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!(
                target: TRACING_TARGET_TRANSACTION,
                elapsed = ?self.started_at.elapsed(),
                "transaction dropped without commit or rollback"
            );
        }
    }
}

impl fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTransaction")
            .field("resolved", &self.resolved)
            .field("elapsed", &self.started_at.elapsed())
            .finish_non_exhaustive()
    }
}
