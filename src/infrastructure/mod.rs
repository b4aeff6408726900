//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Database connection, pool and retry settings
//! - `error`: Unified error types
//! - `postgres`: Pooled query gateway, backends and SQL catalog

pub mod config;
pub mod error;
pub mod postgres;
