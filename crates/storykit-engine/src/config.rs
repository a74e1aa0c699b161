use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StudioError;
use crate::poll::PollPolicy;

pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_IMAGES_DIR: &str = "public/img";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Credentials and knobs, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub replicate_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub api_base: String,
    pub images_dir: PathBuf,
    pub poll: PollPolicy,
    pub request_timeout: Duration,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            replicate_token: None,
            openai_api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
            poll: PollPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                log::warn!("ignoring unreadable .env file: {err}");
            }
        }
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let poll_defaults = defaults.poll;
        let interval = lookup("STORYKIT_POLL_INTERVAL_SECS")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .map(|value| Duration::from_secs_f64(value.clamp(0.0, 60.0)))
            .unwrap_or(poll_defaults.interval);
        let max_attempts = lookup("STORYKIT_POLL_MAX_ATTEMPTS")
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .map(|value| value.clamp(1, 1000))
            .unwrap_or(poll_defaults.max_attempts);

        Self {
            replicate_token: lookup("REPLICATE_API_TOKEN").or_else(|| lookup("REPLICATE_API_KEY")),
            openai_api_key: lookup("OPENAI_API_KEY"),
            api_base: lookup("REPLICATE_API_BASE")
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            images_dir: lookup("STORYKIT_IMAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.images_dir),
            poll: PollPolicy {
                max_attempts,
                interval,
            },
            request_timeout: defaults.request_timeout,
        }
    }

    pub fn require_replicate_token(&self) -> Result<&str, StudioError> {
        self.replicate_token
            .as_deref()
            .ok_or(StudioError::MissingCredential("REPLICATE_API_TOKEN"))
    }

    pub fn require_openai_key(&self) -> Result<&str, StudioError> {
        self.openai_api_key
            .as_deref()
            .ok_or(StudioError::MissingCredential("OPENAI_API_KEY"))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_three_minute_poll_budget() {
        let config = StudioConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.poll.max_attempts, 60);
        assert_eq!(config.poll.interval, Duration::from_secs(3));
        assert_eq!(config.images_dir, PathBuf::from(DEFAULT_IMAGES_DIR));
        assert_eq!(
            config.require_replicate_token(),
            Err(StudioError::MissingCredential("REPLICATE_API_TOKEN"))
        );
        assert_eq!(
            config.require_openai_key().unwrap_err().to_string(),
            "Missing OPENAI_API_KEY"
        );
    }

    #[test]
    fn environment_overrides_are_normalized() {
        let config = StudioConfig::from_lookup(lookup_from(&[
            ("REPLICATE_API_KEY", "r8_alias"),
            ("OPENAI_API_KEY", "sk-test"),
            ("REPLICATE_API_BASE", "http://localhost:9000/v1/"),
            ("STORYKIT_POLL_INTERVAL_SECS", "0.5"),
            ("STORYKIT_POLL_MAX_ATTEMPTS", "0"),
            ("STORYKIT_IMAGES_DIR", "assets/img"),
        ]));
        assert_eq!(config.require_replicate_token(), Ok("r8_alias"));
        assert_eq!(config.require_openai_key(), Ok("sk-test"));
        assert_eq!(config.api_base, "http://localhost:9000/v1");
        assert_eq!(config.poll.interval, Duration::from_millis(500));
        assert_eq!(config.poll.max_attempts, 1);
        assert_eq!(config.images_dir, PathBuf::from("assets/img"));
    }

    #[test]
    fn primary_token_wins_over_alias() {
        let config = StudioConfig::from_lookup(lookup_from(&[
            ("REPLICATE_API_TOKEN", "r8_primary"),
            ("REPLICATE_API_KEY", "r8_alias"),
            ("STORYKIT_POLL_INTERVAL_SECS", "soon"),
        ]));
        assert_eq!(config.require_replicate_token(), Ok("r8_primary"));
        assert_eq!(config.poll.interval, Duration::from_secs(3));
    }
}
