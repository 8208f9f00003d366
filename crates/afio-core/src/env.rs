//! Environment variable utilities
//!
//! ```ignore
//! use afio_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("AFIO_MAX_WORKERS", 8);
//! let no_ring: bool = env_get_bool("AFIO_DISABLE_URING", false);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
///
/// Unset and unparsable values both fall back to `default`.
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

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other set value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("AFIO_TEST_NONEXISTENT_VAR_12345", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_parse() {
        std::env::set_var("AFIO_TEST_PARSE_VAR", "123");
        let val: usize = env_get("AFIO_TEST_PARSE_VAR", 0);
        assert_eq!(val, 123);
        std::env::remove_var("AFIO_TEST_PARSE_VAR");
    }

    #[test]
    fn test_env_get_invalid_falls_back() {
        std::env::set_var("AFIO_TEST_INVALID_VAR", "eight");
        let val: usize = env_get("AFIO_TEST_INVALID_VAR", 8);
        assert_eq!(val, 8);
        std::env::remove_var("AFIO_TEST_INVALID_VAR");
    }

    #[test]
    fn test_env_get_bool() {
        std::env::set_var("AFIO_TEST_BOOL_VAR", "On");
        assert!(env_get_bool("AFIO_TEST_BOOL_VAR", false));
        std::env::set_var("AFIO_TEST_BOOL_VAR", "0");
        assert!(!env_get_bool("AFIO_TEST_BOOL_VAR", true));
        std::env::remove_var("AFIO_TEST_BOOL_VAR");
        assert!(env_get_bool("AFIO_TEST_BOOL_VAR", true));
    }
}
