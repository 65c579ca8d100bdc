//! Common helper functions for Wisp.

use std::str::FromStr;

/// Performs a constant-time comparison of two byte slices.
/// Used when checking integrity fields so a mismatch position is not leaked.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (lhs, rhs) in a.iter().zip(b.iter()) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}

/// Reads and parses an optional environment variable.
///
/// Unset or empty variables yield `Ok(None)`; unparsable values are an error
/// carrying the variable name.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("{name}: {e}")),
        _ => Ok(None),
    }
}
