//! Domain layer modules
//!
//! This module contains business domain logic:
//! - `audit`: Scheduling-group audit trail
//!
//! The scheduling-group API clients and payload builders live in the API
//! test suites, not here.

pub mod audit;
