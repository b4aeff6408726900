// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::postgres;

// Domain layer
pub mod domain;

pub use domain::audit;

// Supporting modules
pub mod diagnostics;
pub mod telemetry;
