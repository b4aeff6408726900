//! Pooled-connection query gateway.
//!
//! Owns one shared pool for the lifetime of a test run and wraps it in a
//! lifecycle policy: idempotent initialization with a retried liveness probe,
//! lazy initialization on first use, per-call query execution and idempotent
//! teardown.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::DatabaseConfig;
use crate::error::{GatewayError, Result};

use super::backend::{PoolBackend, PostgresBackend};
use super::params::SqlParam;
use super::retry::RetryPolicy;
use super::row::Row;

/// Shared database access for a test run.
///
/// Construct one per run (or per worker) and share it by reference or `Arc`.
/// `initialize` once before the tests and `close` once after them; `query`
/// and `health_check` may be called freely in between and initialize the pool
/// themselves if needed. Ordering `close` after every in-flight query is the
/// caller's job.
pub struct Gateway<B: PoolBackend = PostgresBackend> {
    backend: B,
    config: DatabaseConfig,
    retry: RetryPolicy,
    /// Present between `initialize` and `close`
    pool: RwLock<Option<B::Pool>>,
}

impl Gateway<PostgresBackend> {
    /// Create a PostgreSQL gateway. No connection is made until first use.
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_backend(config, PostgresBackend)
    }

    /// Create a PostgreSQL gateway from `.env`, config files and `DB_*` variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(DatabaseConfig::load()?))
    }
}

impl<B: PoolBackend> Gateway<B> {
    pub fn with_backend(config: DatabaseConfig, backend: B) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            backend,
            config,
            retry,
            pool: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether a pool handle currently exists.
    pub async fn is_initialized(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// Create the pool and prove connectivity.
    ///
    /// Returns immediately if a pool already exists. Otherwise builds the pool
    /// and runs the liveness probe up to the configured number of attempts,
    /// waiting the configured delay between failures. On exhaustion returns
    /// [`GatewayError::Connection`] with the last driver error; the pool stays
    /// in place unless `retry.reset_on_exhaustion` is set.
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_pool().await.map(|_| ())
    }

    /// Run the liveness probe once on a fresh connection. Not retried.
    pub async fn health_check(&self) -> Result<DateTime<Utc>> {
        let pool = self.ensure_pool().await?;

        match self.probe(&pool).await {
            Ok(server_time) => {
                tracing::info!(server_time = %server_time, "Database health check passed");
                Ok(server_time)
            }
            Err(source) => {
                tracing::error!(error = %source, "Database health check failed");
                Err(GatewayError::Connection {
                    attempts: 1,
                    source,
                })
            }
        }
    }

    /// Execute a parameterized statement and return its rows.
    ///
    /// No rows is an empty vector, not an error. The lease goes back to the
    /// pool before any error is returned.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        let pool = self.ensure_pool().await?;

        tracing::debug!(params = ?params, "Executing query");

        let mut lease = self
            .backend
            .acquire(&pool)
            .await
            .map_err(|source| GatewayError::Query { source })?;
        let result = self.backend.fetch(&mut lease, sql, params).await;
        drop(lease);

        match result {
            Ok(rows) => {
                tracing::debug!(rows = rows.len(), "Query returned rows");
                Ok(rows)
            }
            Err(source @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_))) => {
                tracing::error!(error = %source, "Could not decode query result");
                Err(GatewayError::Decode {
                    source: Box::new(source),
                })
            }
            Err(source) => {
                tracing::error!(error = %source, "Database query error");
                Err(GatewayError::Query { source })
            }
        }
    }

    /// [`query`](Self::query), decoding each row into `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<T>> {
        self.query(sql, params)
            .await?
            .into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row))
                    .map_err(|source| GatewayError::Decode {
                        source: source.into(),
                    })
            })
            .collect()
    }

    /// [`query`](Self::query) returning only the first row.
    pub async fn query_one<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Option<T>> {
        Ok(self.query_as(sql, params).await?.into_iter().next())
    }

    /// Close every connection and drop the pool. No-op when there is none.
    pub async fn close(&self) {
        let mut guard = self.pool.write().await;

        if let Some(pool) = guard.take() {
            self.backend.close(&pool).await;
            tracing::info!("Database pool closed");
        }
    }

    /// Get the pool, initializing it first if absent.
    async fn ensure_pool(&self) -> Result<B::Pool> {
        {
            let pool = self.pool.read().await;
            if let Some(ref p) = *pool {
                return Ok(p.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<B::Pool> {
        let mut guard = self.pool.write().await;

        // Double-check in case another task initialized while we waited
        if let Some(ref p) = *guard {
            return Ok(p.clone());
        }

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            user = %self.config.user,
            database = %self.config.database,
            max_connections = self.config.pool.max_connections,
            "Initializing database pool"
        );

        let pool = self.backend.create_pool(&self.config);
        *guard = Some(pool.clone());

        let max_attempts = self.retry.max_attempts();
        let probe_pool = &pool;
        let outcome = self
            .retry
            .run(move |attempt| {
                tracing::info!(attempt, max_attempts, "Attempting database connection");
                self.probe(probe_pool)
            })
            .await;

        match outcome {
            Ok(server_time) => {
                tracing::info!(server_time = %server_time, "Database connection successful");
                Ok(pool)
            }
            Err(exhausted) => {
                let source = exhausted.last_error;
                let code = source
                    .as_database_error()
                    .and_then(|e| e.code())
                    .map(|c| c.into_owned());

                tracing::error!(
                    attempts = exhausted.attempts,
                    host = %self.config.host,
                    port = self.config.port,
                    user = %self.config.user,
                    database = %self.config.database,
                    code = ?code,
                    error = %source,
                    "Failed to connect to database"
                );

                if self.config.retry.reset_on_exhaustion {
                    *guard = None;
                    self.backend.close(&pool).await;
                }

                Err(GatewayError::Connection {
                    attempts: exhausted.attempts,
                    source,
                })
            }
        }
    }

    async fn probe(&self, pool: &B::Pool) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
        self.backend.probe(pool).await
    }
}
