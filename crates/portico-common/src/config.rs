//! Configuration utilities for Portico services

use std::str::FromStr;

/// Parse an environment variable, falling back to `default` when the
/// variable is unset or does not parse.
pub fn env_parse_or_default<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}
