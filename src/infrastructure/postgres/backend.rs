//! Pooling backends for the gateway.

use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, Postgres};
use sqlx::Connection;

use crate::config::DatabaseConfig;

use super::params::SqlParam;
use super::queries;
use super::row::{self, Row};

/// The pooling library behind a [`Gateway`](super::Gateway).
///
/// The gateway owns lifecycle policy (init once, retry, teardown); a backend
/// only knows how to build a pool, lend a connection and run statements on it.
/// A lease is returned to its pool when dropped.
#[async_trait]
pub trait PoolBackend: Send + Sync + 'static {
    type Pool: Clone + Send + Sync + 'static;
    type Lease: Send;

    /// Build a pool without connecting. Connections are opened on first acquire.
    fn create_pool(&self, config: &DatabaseConfig) -> Self::Pool;

    /// Check a connection out of the pool.
    async fn acquire(&self, pool: &Self::Pool) -> Result<Self::Lease, sqlx::Error>;

    /// Run the liveness probe, returning the server's clock.
    async fn ping(&self, lease: &mut Self::Lease) -> Result<DateTime<Utc>, sqlx::Error>;

    /// Prove the server accepts connections. The error is the driver's own
    /// (refused, authentication, unknown database), never a pool timeout.
    ///
    /// Defaults to leasing a pooled connection and pinging it.
    async fn probe(&self, pool: &Self::Pool) -> Result<DateTime<Utc>, sqlx::Error> {
        let mut lease = self.acquire(pool).await?;
        self.ping(&mut lease).await
    }

    /// Execute `sql` with positional `params` and collect every row.
    async fn fetch(
        &self,
        lease: &mut Self::Lease,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, sqlx::Error>;

    /// Close every connection. Waits for checked-out connections to come back.
    async fn close(&self, pool: &Self::Pool);
}

/// PostgreSQL through `sqlx::PgPool`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
    }
}

#[async_trait]
impl PoolBackend for PostgresBackend {
    type Pool = PgPool;
    type Lease = PoolConnection<Postgres>;

    fn create_pool(&self, config: &DatabaseConfig) -> PgPool {
        PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .acquire_timeout(config.pool.connect_timeout())
            .idle_timeout(config.pool.idle_timeout())
            // Idle connections are pinged in before_acquire instead
            .test_before_acquire(false)
            .before_acquire(|conn, meta| {
                Box::pin(async move {
                    match conn.ping().await {
                        Ok(()) => Ok::<_, sqlx::Error>(true),
                        Err(e) => {
                            // A connection died while idle. Drop it and let the
                            // pool open a fresh one; the pool itself stays up.
                            tracing::error!(
                                error = %e,
                                idle_for_ms = meta.idle_for.as_millis() as u64,
                                "Unexpected error on idle database connection"
                            );
                            Ok(false)
                        }
                    }
                })
            })
            .connect_lazy_with(Self::connect_options(config))
    }

    async fn acquire(&self, pool: &PgPool) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        pool.acquire().await
    }

    async fn ping(&self, lease: &mut PoolConnection<Postgres>) -> Result<DateTime<Utc>, sqlx::Error> {
        sqlx::query_scalar(queries::NOW)
            .fetch_one(&mut **lease)
            .await
    }

    // A pool acquire keeps retrying a refused connect until its deadline and
    // then reports PoolTimedOut, so the probe opens its own connection.
    async fn probe(&self, pool: &PgPool) -> Result<DateTime<Utc>, sqlx::Error> {
        let options = pool.connect_options();
        let timeout = pool.options().get_acquire_timeout();

        let mut conn = tokio::time::timeout(timeout, PgConnection::connect_with(&*options))
            .await
            .map_err(|_| {
                sqlx::Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to the database timed out after {timeout:?}"),
                ))
            })??;

        let server_time = sqlx::query_scalar(queries::NOW).fetch_one(&mut conn).await;
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Error closing probe connection");
        }
        server_time
    }

    async fn fetch(
        &self,
        lease: &mut PoolConnection<Postgres>,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, sqlx::Error> {
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, param| param.bind_to(query));

        let rows = query.fetch_all(&mut **lease).await?;
        rows.iter().map(row::to_json).collect()
    }

    async fn close(&self, pool: &PgPool) {
        pool.close().await;
    }
}
