// Environment-backed configuration helpers shared by the engine and binaries

use std::str::FromStr;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid value for {key}: '{value}'")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

/// Read `key` from the environment and parse it, falling back to `default`
/// when the variable is unset. A set but unparsable value is an error.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

/// Interpret common truthy spellings ("1", "true", "yes", "on").
pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string())
}
