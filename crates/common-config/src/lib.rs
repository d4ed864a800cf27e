//! Shared configuration helpers for the metrics-log-api workspace.

use std::env;

/// Resolve the port for a service from an environment variable.
///
/// Falls back to the provided default when the variable is missing or cannot be
/// parsed into a `u16`.
pub fn service_port(var: &str, default: u16) -> u16 {
    match env::var(var) {
        Ok(value) => value
            .parse::<u16>()
            .inspect_err(|error| {
                tracing::warn!(%var, %value, %error, "invalid port override, using default");
            })
            .unwrap_or(default),
        Err(_) => default,
    }
}

/// Read a string setting, treating an empty value the same as a missing one.
pub fn env_or(var: &str, default: &str) -> String {
    match env::var(var) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}
