//! Protocol tuning knobs.
//!
//! Durations are written as humantime strings (`"60s"`, `"1m 30s"`) so the
//! same struct can be embedded as the `[protocol]` table of the node's TOML
//! configuration.

use crate::cache::CacheTimeouts;
use crate::transfer::{CHUNK_SIZE, MAX_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Challenges in flight right after the blob arrives.
pub const DEFAULT_MAX_OUTSTANDING_CHALLENGES: usize = 10;

/// Out of 256: chance that the next challenge is an honesty probe.
pub const DEFAULT_HONESTY_CHECK_THRESHOLD: u16 = 38;

/// Configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_size must be between 1 and {max}, got {size}")]
    InvalidChunkSize { size: usize, max: usize },

    #[error("max_outstanding_challenges must be at least 1")]
    NoChallengeWindow,

    #[error("honesty_check_threshold must be at most 256, got {0}")]
    InvalidThreshold(u16),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Attestation protocol configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    /// Bytes per ATTESTATION chunk
    pub chunk_size: usize,

    /// Initial challenge window per proving session
    pub max_outstanding_challenges: usize,

    /// Honesty probe draw: `random_byte < threshold` (0 disables, 256 always)
    pub honesty_check_threshold: u16,

    /// TTL of issuance, transfer and proving sessions
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,

    /// TTL of a single pending challenge
    #[serde(with = "duration_str")]
    pub challenge_timeout: Duration,

    /// How often expired sessions are swept
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_outstanding_challenges: DEFAULT_MAX_OUTSTANDING_CHALLENGES,
            honesty_check_threshold: DEFAULT_HONESTY_CHECK_THRESHOLD,
            request_timeout: Duration::from_secs(60),
            challenge_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl CommunityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                size: self.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }
        if self.max_outstanding_challenges == 0 {
            return Err(ConfigError::NoChallengeWindow);
        }
        if self.honesty_check_threshold > 256 {
            return Err(ConfigError::InvalidThreshold(self.honesty_check_threshold));
        }
        for (name, value) in [
            ("request_timeout", self.request_timeout),
            ("challenge_timeout", self.challenge_timeout),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    pub fn cache_timeouts(&self) -> CacheTimeouts {
        CacheTimeouts {
            request: self.request_timeout,
            challenge: self.challenge_timeout,
        }
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = CommunityConfig::default();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.max_outstanding_challenges, 10);
        assert_eq!(config.honesty_check_threshold, 38);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_chunks() {
        let config = CommunityConfig {
            chunk_size: MAX_CHUNK_SIZE + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkSize { .. })
        ));

        let config = CommunityConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_window() {
        let config = CommunityConfig {
            max_outstanding_challenges: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoChallengeWindow));
    }

    #[test]
    fn test_humantime_durations_in_toml() {
        let config: CommunityConfig = toml::from_str(
            r#"
            chunk_size = 600
            request_timeout = "2m"
            challenge_timeout = "15s"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunk_size, 600);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.challenge_timeout, Duration::from_secs(15));
        // Unset fields fall back to defaults
        assert_eq!(config.sweep_interval, Duration::from_secs(1));

        let encoded = toml::to_string(&config).unwrap();
        assert!(encoded.contains("request_timeout = \"2m\""));
        let decoded: CommunityConfig = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result: Result<CommunityConfig, _> = toml::from_str(r#"request_timeout = "soon""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_timeouts() {
        let timeouts = CommunityConfig::default().cache_timeouts();
        assert_eq!(timeouts.request, Duration::from_secs(60));
        assert_eq!(timeouts.challenge, Duration::from_secs(10));
    }
}
