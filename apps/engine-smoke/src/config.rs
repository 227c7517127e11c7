//! Environment-backed runtime configuration for `engine-smoke`.

use std::{env, error::Error, fmt};

use url::Url;

use engine_core::EngineConfig;

const DEFAULT_GATEWAY_URL: &str = "https://chat.example.org";
const DEFAULT_USER_ID: &str = "smoke-user";

/// Runtime configuration used by the smoke harness.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Gateway base URL; the loopback gateway only logs it, but it must parse.
    pub gateway_url: Url,
    /// Engine tuning forwarded to `spawn_engine`.
    pub engine: EngineConfig,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let gateway_url = optional_trimmed_env("ALCOVE_GATEWAY_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_owned());
        let gateway_url = Url::parse(&gateway_url).map_err(|err| ConfigError::InvalidValue {
            key: "ALCOVE_GATEWAY_URL",
            value: gateway_url.clone(),
            reason: err.to_string(),
        })?;

        let user_id = optional_trimmed_env("ALCOVE_USER_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_USER_ID.to_owned());

        let mut engine = EngineConfig::new(user_id);
        if let Some(page_size) = parse_optional_u16("ALCOVE_PAGE_SIZE", &mut lookup)? {
            engine.page_size = page_size;
        }
        if let Some(max_posts) = parse_optional_usize("ALCOVE_TIMELINE_MAX_POSTS", &mut lookup)? {
            engine.timeline_max_posts = max_posts;
        }
        if let Some(base_ms) = parse_optional_u64("ALCOVE_RETRY_BASE_MS", &mut lookup)? {
            engine.retry_base_ms = base_ms;
        }
        if let Some(max_ms) = parse_optional_u64("ALCOVE_RETRY_MAX_MS", &mut lookup)? {
            engine.retry_max_ms = max_ms;
        }
        engine.max_reconnect_attempts =
            parse_optional_u32("ALCOVE_MAX_RECONNECT_ATTEMPTS", &mut lookup)?;
        if let Some(ttl_ms) = parse_optional_u64("ALCOVE_TYPING_TTL_MS", &mut lookup)? {
            engine.typing_ttl_ms = ttl_ms;
        }
        if let Some(cooldown_ms) = parse_optional_u64("ALCOVE_PAGINATION_COOLDOWN_MS", &mut lookup)?
        {
            engine.pagination_cooldown_ms = cooldown_ms;
        }

        if engine.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ALCOVE_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if engine.timeline_max_posts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ALCOVE_TIMELINE_MAX_POSTS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if engine.retry_max_ms < engine.retry_base_ms {
            return Err(ConfigError::InvalidValue {
                key: "ALCOVE_RETRY_MAX_MS",
                value: engine.retry_max_ms.to_string(),
                reason: format!(
                    "must be at least the base delay ({})",
                    engine.retry_base_ms
                ),
            });
        }

        Ok(Self {
            gateway_url,
            engine,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u16<F>(key: &'static str, lookup: &mut F) -> Result<Option<u16>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<u16>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u32<F>(key: &'static str, lookup: &mut F) -> Result<Option<u32>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_usize<F>(key: &'static str, lookup: &mut F) -> Result<Option<usize>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn parses_defaults_without_environment() {
        let cfg = config_from_pairs(&[]).expect("config should parse");

        assert_eq!(cfg.gateway_url.as_str(), "https://chat.example.org/");
        assert_eq!(cfg.engine.user_id, "smoke-user");
        assert_eq!(cfg.engine.page_size, 30);
        assert_eq!(cfg.engine.max_reconnect_attempts, None);
    }

    #[test]
    fn applies_engine_tuning_overrides() {
        let cfg = config_from_pairs(&[
            ("ALCOVE_USER_ID", "alice"),
            ("ALCOVE_PAGE_SIZE", "50"),
            ("ALCOVE_RETRY_BASE_MS", "250"),
            ("ALCOVE_RETRY_MAX_MS", "8000"),
            ("ALCOVE_MAX_RECONNECT_ATTEMPTS", "6"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.engine.user_id, "alice");
        assert_eq!(cfg.engine.page_size, 50);
        assert_eq!(cfg.engine.retry_base_ms, 250);
        assert_eq!(cfg.engine.retry_max_ms, 8_000);
        assert_eq!(cfg.engine.max_reconnect_attempts, Some(6));
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[("ALCOVE_PAGE_SIZE", "abc")])
            .expect_err("invalid page size should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ALCOVE_PAGE_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unparseable_gateway_url() {
        let err = config_from_pairs(&[("ALCOVE_GATEWAY_URL", "not a url")])
            .expect_err("invalid url should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ALCOVE_GATEWAY_URL",
                ..
            }
        ));
    }

    #[test]
    fn rejects_backoff_cap_below_base() {
        let err = config_from_pairs(&[
            ("ALCOVE_RETRY_BASE_MS", "5000"),
            ("ALCOVE_RETRY_MAX_MS", "100"),
        ])
        .expect_err("inverted backoff bounds should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ALCOVE_RETRY_MAX_MS",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_page_size() {
        let err = config_from_pairs(&[("ALCOVE_PAGE_SIZE", "0")])
            .expect_err("zero page size should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ALCOVE_PAGE_SIZE",
                ..
            }
        ));
    }
}
