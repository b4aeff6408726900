use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The liveness probe failed on every attempt, or a health check failed.
    #[error("Database connection failed after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// Statement execution failed. Never retried.
    #[error("Database query failed: {source}")]
    Query {
        #[source]
        source: sqlx::Error,
    },

    /// A column had no JSON rendering, or a row did not fit the requested type.
    #[error("Failed to decode row: {source}")]
    Decode {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl GatewayError {
    /// The driver error behind a connection or query failure.
    pub fn driver_error(&self) -> Option<&sqlx::Error> {
        match self {
            GatewayError::Connection { source, .. } | GatewayError::Query { source } => Some(source),
            _ => None,
        }
    }

    /// Vendor error code (SQLSTATE) reported by the server, if any.
    pub fn code(&self) -> Option<String> {
        self.driver_error()
            .and_then(|e| e.as_database_error())
            .and_then(|e| e.code())
            .map(|code| code.into_owned())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, GatewayError::Connection { .. })
    }

    pub fn is_query(&self) -> bool {
        matches!(self, GatewayError::Query { .. })
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
