// ============================================================================
// Environment lookup
// ============================================================================

use anyhow::{Context, Result};
use std::str::FromStr;

/// Source of configuration values.
///
/// Production reads the process environment; tests hand in a map so they never
/// have to mutate global state.
pub struct EnvSource<'a> {
    lookup: Box<dyn Fn(&str) -> Option<String> + 'a>,
}

impl<'a> EnvSource<'a> {
    pub fn process() -> Self {
        Self {
            lookup: Box::new(|key| std::env::var(key).ok()),
        }
    }

    pub fn from_fn(lookup: impl Fn(&str) -> Option<String> + 'a) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    pub fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .with_context(|| format!("{} must be set", key))
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a value, falling back to `default` when missing or malformed.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(key = key, value = %raw, "Invalid config value, using default");
                    default
                }
            },
            None => default,
        }
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(default)
    }
}
