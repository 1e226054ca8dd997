//! Database collaborator traits.
//!
//! The transaction stage only needs to begin a transaction and resolve it
//! once. These traits describe exactly that, so the stage can run against
//! Postgres in production and against a recording backend in tests.

use async_trait::async_trait;
use conduit_postgres::{PgClient, PgTransaction};

use crate::Result;

/// A database that can open request-scoped transactions.
#[async_trait]
pub trait Database: Clone + Send + Sync + 'static {
    /// The transaction handle this database hands out.
    type Transaction: Transaction;

    /// Opens a new transaction.
    ///
    /// May suspend until a pooled connection is available.
    async fn begin(&self) -> Result<Self::Transaction>;
}

/// An open transaction, resolved exactly once.
#[async_trait]
pub trait Transaction: Send + 'static {
    /// Makes the transaction's writes durable.
    async fn commit(self) -> Result<()>;

    /// Discards the transaction's writes.
    async fn rollback(self) -> Result<()>;
}

#[async_trait]
impl Database for PgClient {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction> {
        Ok(PgTransaction::begin(self).await?)
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self) -> Result<()> {
        Ok(PgTransaction::commit(self).await?)
    }

    async fn rollback(self) -> Result<()> {
        Ok(PgTransaction::rollback(self).await?)
    }
}
