//! Environment variable utilities
//!
//! Generic `env_get<T>` for parsing environment variables with defaults.
//! Used by `PoolConfig::from_env` and the log level setup.

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Anything else set is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__BURST_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_bool_default() {
        assert!(env_get_bool("__BURST_TEST_UNSET__", true));
        assert!(!env_get_bool("__BURST_TEST_UNSET__", false));
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<usize> = env_get_opt("__BURST_TEST_UNSET__");
        assert!(val.is_none());
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__BURST_TEST_NUM__", "123");
        let val: usize = env_get("__BURST_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__BURST_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__BURST_TEST_BAD__", "not_a_number");
        let val: usize = env_get("__BURST_TEST_BAD__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__BURST_TEST_BAD__");
    }
}
