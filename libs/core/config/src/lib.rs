pub mod tracing;

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("One of the environment variables {} is required but none is set", .0.join(", "))]
    MissingOneOf(Vec<String>),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Process environment, selects the log format
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match env_optional("APP_ENV") {
            Some(value) if value.eq_ignore_ascii_case("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Read a variable, treating unset and blank values the same way
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read a variable or fall back to `default`
pub fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

/// Read a variable or fail with [`ConfigError::MissingEnvVar`]
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env_optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Return the first of `keys` that is set; order expresses priority
pub fn env_required_any(keys: &[&str]) -> Result<String, ConfigError> {
    keys.iter()
        .find_map(|key| env_optional(key))
        .ok_or_else(|| ConfigError::MissingOneOf(keys.iter().map(|k| k.to_string()).collect()))
}

/// Parse a variable into `T`, using `default` when it is not set
pub fn env_parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env_optional(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse an optional variable into `T`
pub fn env_parse_optional<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    env_optional(key)
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            })
        })
        .transpose()
}

/// Boolean switch accepting true/false, 1/0, yes/no and on/off
pub fn env_flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = env_optional(key) else {
        return Ok(default);
    };

    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ParseError {
            key: key.to_string(),
            details: format!("'{}' is not a boolean", raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        for value in ["production", "PRODUCTION", "Production"] {
            temp_env::with_var("APP_ENV", Some(value), || {
                assert_eq!(Environment::from_env(), Environment::Production);
            });
        }
    }

    #[test]
    fn test_environment_unknown_defaults_to_development() {
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_env_optional_treats_blank_as_unset() {
        temp_env::with_var("KC_BLANK_VAR", Some("   "), || {
            assert_eq!(env_optional("KC_BLANK_VAR"), None);
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("KC_SET_VAR", Some("value"), || {
            assert_eq!(env_or_default("KC_SET_VAR", "fallback"), "value");
        });
        temp_env::with_var_unset("KC_UNSET_VAR", || {
            assert_eq!(env_or_default("KC_UNSET_VAR", "fallback"), "fallback");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("KC_MISSING_REQUIRED", || {
            let err = env_required("KC_MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("KC_MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_required_any_respects_priority() {
        temp_env::with_vars(
            [("KC_FIRST", Some("first")), ("KC_SECOND", Some("second"))],
            || {
                assert_eq!(env_required_any(&["KC_FIRST", "KC_SECOND"]).unwrap(), "first");
            },
        );
        temp_env::with_vars(
            [("KC_FIRST", None::<&str>), ("KC_SECOND", Some("second"))],
            || {
                assert_eq!(env_required_any(&["KC_FIRST", "KC_SECOND"]).unwrap(), "second");
            },
        );
    }

    #[test]
    fn test_env_required_any_none_set() {
        temp_env::with_vars([("KC_A", None::<&str>), ("KC_B", None::<&str>)], || {
            let err = env_required_any(&["KC_A", "KC_B"]).unwrap_err();
            assert!(matches!(err, ConfigError::MissingOneOf(_)));
            assert!(err.to_string().contains("KC_A, KC_B"));
        });
    }

    #[test]
    fn test_env_parse_or() {
        temp_env::with_var("KC_TIMEOUT", Some("45"), || {
            assert_eq!(env_parse_or("KC_TIMEOUT", 30u64).unwrap(), 45);
        });
        temp_env::with_var_unset("KC_TIMEOUT", || {
            assert_eq!(env_parse_or("KC_TIMEOUT", 30u64).unwrap(), 30);
        });
        temp_env::with_var("KC_TIMEOUT", Some("soon"), || {
            let err = env_parse_or("KC_TIMEOUT", 30u64).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "KC_TIMEOUT"));
        });
    }

    #[test]
    fn test_env_parse_optional() {
        temp_env::with_var_unset("KC_DIM", || {
            assert_eq!(env_parse_optional::<usize>("KC_DIM").unwrap(), None);
        });
        temp_env::with_var("KC_DIM", Some("1024"), || {
            assert_eq!(env_parse_optional::<usize>("KC_DIM").unwrap(), Some(1024));
        });
    }

    #[test]
    fn test_env_flag() {
        temp_env::with_var("KC_FLAG", Some("YES"), || {
            assert!(env_flag("KC_FLAG", false).unwrap());
        });
        temp_env::with_var("KC_FLAG", Some("0"), || {
            assert!(!env_flag("KC_FLAG", true).unwrap());
        });
        temp_env::with_var_unset("KC_FLAG", || {
            assert!(env_flag("KC_FLAG", true).unwrap());
        });
        temp_env::with_var("KC_FLAG", Some("maybe"), || {
            assert!(env_flag("KC_FLAG", false).is_err());
        });
    }
}
