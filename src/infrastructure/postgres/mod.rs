//! PostgreSQL access module.
//!
//! Provides the pooled query gateway, its pooling backends and the SQL
//! catalog used to cross-check API results.

pub mod backend;
pub mod gateway;
pub mod params;
pub mod queries;
pub mod retry;
pub mod row;

pub use backend::{PoolBackend, PostgresBackend};
pub use gateway::Gateway;
pub use params::SqlParam;
pub use retry::{RetryExhausted, RetryPolicy};
pub use row::Row;
