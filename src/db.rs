//! Query and transaction facade over the pool registry.
//!
//! Connections are acquired per call and returned on every exit path. Transactions
//! commit only when the unit of work returns `Ok`; on `Err` they roll back and
//! hand back the caller's original error. Nothing is retried here.

use crate::error::TenancyError;
use crate::registry::{PoolRegistry, PoolStats};
use crate::sql::{bind_all, SqlParam};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Future returned by a transaction's unit of work. Borrows the connection for `'c`.
pub type UnitOfWork<'c, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>;

/// Cheap to clone; hand one to every request handler.
#[derive(Clone)]
pub struct Db {
    registry: Arc<PoolRegistry>,
    query_timeout: Duration,
}

impl Db {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        let config = registry.config();
        // The server-side statement_timeout should fire first; this bounds acquire + round trip.
        let query_timeout = config.statement_timeout + config.acquire_timeout;
        Db {
            registry,
            query_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Run a statement on the core database and return its rows.
    pub async fn core_query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<PgRow>, TenancyError> {
        let pool = self.registry.get_core_pool()?;
        self.fetch_all(&pool, sql, params).await
    }

    /// Run a statement on `slug`'s database, building its pool on first use.
    pub async fn tenant_query(
        &self,
        slug: &str,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<PgRow>, TenancyError> {
        let pool = self.registry.get_or_create_tenant_pool(slug).await?;
        self.fetch_all(&pool, sql, params).await
    }

    /// Like [`Db::core_query`] but returns the number of affected rows.
    pub async fn core_execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, TenancyError> {
        let pool = self.registry.get_core_pool()?;
        self.execute(&pool, sql, params).await
    }

    pub async fn tenant_execute(&self, slug: &str, sql: &str, params: &[SqlParam]) -> Result<u64, TenancyError> {
        let pool = self.registry.get_or_create_tenant_pool(slug).await?;
        self.execute(&pool, sql, params).await
    }

    async fn fetch_all(&self, pool: &PgPool, sql: &str, params: &[SqlParam]) -> Result<Vec<PgRow>, TenancyError> {
        tracing::debug!(sql = %sql, params = params.len(), "query");
        let work = async {
            let mut conn = pool.acquire().await?;
            let rows = bind_all(sql, params).fetch_all(&mut *conn).await?;
            Ok::<_, TenancyError>(rows)
        };
        self.bounded(work).await
    }

    async fn execute(&self, pool: &PgPool, sql: &str, params: &[SqlParam]) -> Result<u64, TenancyError> {
        tracing::debug!(sql = %sql, params = params.len(), "execute");
        let work = async {
            let mut conn = pool.acquire().await?;
            let done = bind_all(sql, params).execute(&mut *conn).await?;
            Ok::<_, TenancyError>(done.rows_affected())
        };
        self.bounded(work).await
    }

    async fn bounded<T>(&self, work: impl Future<Output = Result<T, TenancyError>>) -> Result<T, TenancyError> {
        match tokio::time::timeout(self.query_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(TenancyError::Timeout(format!(
                "query exceeded {}ms",
                self.query_timeout.as_millis()
            ))),
        }
    }

    /// Run `work` in a core-database transaction.
    ///
    /// ```ignore
    /// db.with_core_transaction(|conn| Box::pin(async move {
    ///     sqlx::query("UPDATE libraries SET is_active = false WHERE slug = $1")
    ///         .bind(slug)
    ///         .execute(&mut *conn)
    ///         .await?;
    ///     Ok::<_, TenancyError>(())
    /// }))
    /// .await?;
    /// ```
    pub async fn with_core_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> UnitOfWork<'c, T, E>,
        E: From<TenancyError>,
    {
        let pool = self.registry.get_core_pool().map_err(E::from)?;
        run_in_transaction(&pool, "core", work).await
    }

    /// Run `work` in a transaction on `slug`'s database.
    pub async fn with_tenant_transaction<T, E, F>(&self, slug: &str, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> UnitOfWork<'c, T, E>,
        E: From<TenancyError>,
    {
        let pool = self
            .registry
            .get_or_create_tenant_pool(slug)
            .await
            .map_err(E::from)?;
        run_in_transaction(&pool, slug, work).await
    }

    /// Connection counts for the core pool, if it is up.
    pub fn core_stats(&self) -> Option<PoolStats> {
        self.registry.get_core_pool().ok().map(|p| PoolStats::of(&p))
    }

    pub fn tenant_stats(&self, slug: &str) -> Option<PoolStats> {
        self.registry.tenant_stats(slug)
    }
}

async fn run_in_transaction<T, E, F>(pool: &PgPool, scope: &str, work: F) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> UnitOfWork<'c, T, E>,
    E: From<TenancyError>,
{
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| E::from(TenancyError::from(e)))?;
    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit().await.map_err(|e| E::from(TenancyError::from(e)))?;
            Ok(value)
        }
        Err(err) => {
            // A failed rollback must not replace the error that caused it.
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(scope, error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
