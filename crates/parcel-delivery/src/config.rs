//! Configuration for the router and its pipelines.

use std::time::Duration;

use crate::error::{DeliveryError, Result};

/// Default warm-up delay before a new pipeline starts consuming.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(10);

/// Default number of dealers allowed in flight per pipeline.
pub const DEFAULT_DEALERS_IN_FLIGHT: usize = 2;

/// Default capacity of the warm-up request stash.
pub const DEFAULT_STASH_CAPACITY: usize = 16;

/// Router and pipeline configuration.
///
/// Per-subscription knobs (acknowledge timeout, retry attempts, backoff
/// bounds, token values) live on `Subscription`; this covers the
/// process-wide settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Prefix applied uniformly to every topic name on consume and publish.
    pub topic_prefix: String,

    /// Grace period between pipeline creation and stream open; subscribe
    /// requests arriving during warm-up are stashed and replayed.
    pub warmup: Duration,

    /// Maximum subscribe requests stashed during warm-up.
    pub warmup_stash_capacity: usize,

    /// Maximum dealers in flight per consumption pipeline.
    pub max_dealers_in_flight: usize,

    /// Whether a decode failure skips the record and resumes the stream
    /// rather than terminating the pipeline.
    pub resume_on_decode_error: bool,

    /// Capacity of the router's request mailbox.
    pub mailbox_capacity: usize,

    /// Maximum time to wait for pipelines to drain on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            topic_prefix: String::new(),
            warmup: DEFAULT_WARMUP,
            warmup_stash_capacity: DEFAULT_STASH_CAPACITY,
            max_dealers_in_flight: DEFAULT_DEALERS_IN_FLIGHT,
            resume_on_decode_error: true,
            mailbox_capacity: 64,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl RouterConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `PARCEL_TOPIC_PREFIX`, `PARCEL_WARMUP_SECONDS`,
    /// `PARCEL_DEALERS_IN_FLIGHT`, `PARCEL_RESUME_ON_DECODE_ERROR`,
    /// `PARCEL_SHUTDOWN_TIMEOUT_SECONDS`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a set variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("PARCEL_TOPIC_PREFIX") {
            config.topic_prefix = prefix;
        }
        if let Some(seconds) = parse_env::<u64>("PARCEL_WARMUP_SECONDS")? {
            config.warmup = Duration::from_secs(seconds);
        }
        if let Some(dealers) = parse_env::<usize>("PARCEL_DEALERS_IN_FLIGHT")? {
            if dealers == 0 {
                return Err(DeliveryError::configuration(
                    "PARCEL_DEALERS_IN_FLIGHT must be at least 1",
                ));
            }
            config.max_dealers_in_flight = dealers;
        }
        if let Some(resume) = parse_env::<bool>("PARCEL_RESUME_ON_DECODE_ERROR")? {
            config.resume_on_decode_error = resume;
        }
        if let Some(seconds) = parse_env::<u64>("PARCEL_SHUTDOWN_TIMEOUT_SECONDS")? {
            config.shutdown_timeout = Duration::from_secs(seconds);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| DeliveryError::configuration(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let config = RouterConfig::default();
        assert_eq!(config.warmup, Duration::from_secs(10));
        assert_eq!(config.max_dealers_in_flight, 2);
        assert!(config.resume_on_decode_error);
        assert!(config.topic_prefix.is_empty());
    }

    // Env mutation is process-wide, so all from_env coverage lives in one
    // test to keep it serialized.
    #[test]
    fn env_overrides_parse_and_invalid_values_rejected() {
        std::env::set_var("PARCEL_WARMUP_SECONDS", "3");
        std::env::set_var("PARCEL_TOPIC_PREFIX", "staging.");
        let config = RouterConfig::from_env().unwrap();
        assert_eq!(config.warmup, Duration::from_secs(3));
        assert_eq!(config.topic_prefix, "staging.");

        std::env::set_var("PARCEL_DEALERS_IN_FLIGHT", "zero");
        assert!(RouterConfig::from_env().is_err());
        std::env::set_var("PARCEL_DEALERS_IN_FLIGHT", "0");
        assert!(RouterConfig::from_env().is_err());

        std::env::remove_var("PARCEL_WARMUP_SECONDS");
        std::env::remove_var("PARCEL_TOPIC_PREFIX");
        std::env::remove_var("PARCEL_DEALERS_IN_FLIGHT");
    }
}
