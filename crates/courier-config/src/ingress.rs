// ============================================================================
// Ingress Limits
// ============================================================================

use crate::constants::{MAX_CONTENT_BYTES, MAX_RECIPIENTS};
use crate::env::EnvSource;

/// Shape limits applied by the producer before anything is appended
#[derive(Clone, Debug)]
pub struct IngressLimits {
    pub max_content_bytes: usize,
    pub max_recipients: usize,
}

impl IngressLimits {
    pub(crate) fn from_source(env: &EnvSource<'_>) -> Self {
        Self {
            max_content_bytes: env.parse_or("MAX_CONTENT_BYTES", MAX_CONTENT_BYTES),
            max_recipients: env.parse_or("MAX_RECIPIENTS", MAX_RECIPIENTS),
        }
    }
}

impl Default for IngressLimits {
    fn default() -> Self {
        Self {
            max_content_bytes: MAX_CONTENT_BYTES,
            max_recipients: MAX_RECIPIENTS,
        }
    }
}
