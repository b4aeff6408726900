mod settings;

pub use settings::{DatabaseConfig, FieldDifference, PoolConfig, RetryConfig};
