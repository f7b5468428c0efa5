// ============================================================================
// Database Configuration
// ============================================================================

use crate::env::EnvSource;

/// Database connection pool configuration
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Timeout for acquiring a connection from the pool (seconds)
    pub acquire_timeout_secs: u64,
    /// Timeout for idle connections before they are closed (seconds)
    pub idle_timeout_secs: u64,
}

impl DbConfig {
    pub(crate) fn from_source(env: &EnvSource<'_>) -> Self {
        Self {
            max_connections: env.parse_or("DB_MAX_CONNECTIONS", 10),
            acquire_timeout_secs: env.parse_or("DB_ACQUIRE_TIMEOUT_SECS", 30),
            idle_timeout_secs: env.parse_or("DB_IDLE_TIMEOUT_SECS", 600),
        }
    }
}
