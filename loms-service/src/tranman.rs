//! Transactions with an explicit isolation level.
//!
//! Repository calls receive the executor they must run on: either the connection of the
//! surrounding transaction or a plain pool connection. There is no implicit lookup of the
//! "current" transaction.

use async_trait::async_trait;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::AsyncPgConnection;
use futures::future::BoxFuture;
use tracing::debug;

use crate::errors::LomsError;

pub type DbPool = Pool<AsyncPgConnection>;

pub type TxFuture<'c, T> = BoxFuture<'c, Result<T, LomsError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
    RepeatableRead,
    ReadCommitted,
    ReadUncommitted,
}

#[async_trait]
pub trait TransactionManager: Send + Sync + 'static {
    /// What repository calls execute against.
    type Conn: Send + 'static;

    /// Runs `f` inside one transaction. It commits when `f` returns `Ok` and rolls back
    /// otherwise, handing back the error unchanged.
    async fn run_transaction<T, F>(&self, level: IsolationLevel, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static;

    /// Runs `f` on a connection outside of any explicit transaction.
    async fn run_standalone<T, F>(&self, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static;

    async fn run_serializable<T, F>(&self, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static,
    {
        self.run_transaction(IsolationLevel::Serializable, f).await
    }

    async fn run_repeatable_read<T, F>(&self, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static,
    {
        self.run_transaction(IsolationLevel::RepeatableRead, f).await
    }

    async fn run_read_committed<T, F>(&self, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static,
    {
        self.run_transaction(IsolationLevel::ReadCommitted, f).await
    }

    async fn run_read_uncommitted<T, F>(&self, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static,
    {
        self.run_transaction(IsolationLevel::ReadUncommitted, f).await
    }
}

#[derive(Clone)]
pub struct PgTransactionManager {
    pool: DbPool,
}

impl PgTransactionManager {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    type Conn = AsyncPgConnection;

    async fn run_transaction<T, F>(&self, level: IsolationLevel, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static,
    {
        let mut conn = self.pool.get().await?;
        debug!(?level, "beginning transaction");
        let builder = conn.build_transaction();
        // Postgres runs READ UNCOMMITTED as READ COMMITTED.
        let mut builder = match level {
            IsolationLevel::Serializable => builder.serializable(),
            IsolationLevel::RepeatableRead => builder.repeatable_read(),
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                builder.read_committed()
            }
        };
        builder.run(move |conn| Box::pin(f(conn))).await
    }

    async fn run_standalone<T, F>(&self, f: F) -> Result<T, LomsError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Self::Conn) -> TxFuture<'c, T> + Send + 'static,
    {
        let mut conn = self.pool.get().await?;
        f(&mut *conn).await
    }
}
