// ============================================================================
// Logging Configuration
// ============================================================================

use crate::env::EnvSource;

const PLACEHOLDER_SALT: &str = "default-salt-please-change";

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Salt for hashing user identifiers before they reach the logs
    pub hash_salt: String,
}

impl LoggingConfig {
    pub(crate) fn from_source(env: &EnvSource<'_>) -> anyhow::Result<Self> {
        let salt = env.string("LOG_HASH_SALT", PLACEHOLDER_SALT);
        if salt == PLACEHOLDER_SALT {
            anyhow::bail!("LOG_HASH_SALT must be set to a unique, secret value");
        }
        Ok(Self { hash_salt: salt })
    }
}
