//! Tunable knobs and deployment profiles.
//!
//! Profiles change values, never behaviour. `Balanced` is the default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::settings::DEFAULT_SIMILARITY_THRESHOLD;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// Deployment profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Small chunks, long pauses. Lowest chance of tripping abuse detection.
    Safe,
    #[default]
    Balanced,
    /// No inter-file pacing.
    Fast,
}

/// Inter-file pacing applied after each successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacing {
    /// Base delay after a file at or below `large_file_threshold`.
    pub small_file_delay: Duration,
    /// Base delay after a file above `large_file_threshold`.
    pub large_file_delay: Duration,
    pub large_file_threshold: u64,
    /// Upper bound of the random extra added to the base delay.
    pub jitter: Duration,
}

/// Every knob consumed by the transfer core.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub profile: Profile,
    /// Bytes requested per remote chunk fetch.
    pub chunk_size: usize,
    /// Maximum chunks waiting between producer and consumer.
    pub queue_capacity: usize,
    /// Part size handed to the uploader, in bytes.
    pub upload_part_size: usize,
    /// Attempts per file.
    pub max_retries: u32,
    /// Longest advertised rate-limit wait we honour.
    pub flood_wait_cap: Duration,
    /// Delay before retrying after a stale reference.
    pub stale_retry_delay: Duration,
    /// Delay before retrying after a generic fault.
    pub error_retry_delay: Duration,
    /// Consecutive faults that halt the whole session.
    pub circuit_breaker_threshold: u32,
    /// Minimum spacing between byte-progress notifications.
    pub progress_interval: Duration,
    /// Producer pauses after every this many chunks.
    pub throttle_every_chunks: u64,
    pub throttle_pause: Duration,
    pub pacing: Option<Pacing>,
    /// Fixed pause inserted every 3 to 5 processed items, paced or not.
    pub hygiene_pause: Duration,
    /// Used when a session's threshold is not a number.
    pub similarity_threshold: f64,
    pub raster_dpi: u32,
    /// Frame offset used by `ThumbnailMode::Generate`.
    pub thumbnail_offset: Duration,
    /// Leading bytes of a video fed to the frame extractor.
    pub thumbnail_probe_bytes: u64,
}

impl RelayConfig {
    /// Configuration for a deployment profile.
    pub fn for_profile(profile: Profile) -> Self {
        let base = Self {
            profile,
            chunk_size: 2 * MIB,
            queue_capacity: 3,
            upload_part_size: 2 * MIB,
            max_retries: 3,
            flood_wait_cap: Duration::from_secs(90),
            stale_retry_delay: Duration::from_secs(2),
            error_retry_delay: Duration::from_secs(5),
            circuit_breaker_threshold: 5,
            progress_interval: Duration::from_secs(12),
            throttle_every_chunks: 10,
            throttle_pause: Duration::from_millis(100),
            pacing: Some(Pacing {
                small_file_delay: Duration::from_secs(2),
                large_file_delay: Duration::from_secs(3),
                large_file_threshold: 50 * MIB as u64,
                jitter: Duration::from_secs(1),
            }),
            hygiene_pause: Duration::from_secs(3),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            raster_dpi: 150,
            thumbnail_offset: Duration::from_secs(1),
            thumbnail_probe_bytes: 16 * MIB as u64,
        };

        match profile {
            Profile::Balanced => base,
            Profile::Safe => Self {
                chunk_size: 512 * KIB,
                queue_capacity: 2,
                upload_part_size: 512 * KIB,
                progress_interval: Duration::from_secs(15),
                pacing: Some(Pacing {
                    small_file_delay: Duration::from_secs(3),
                    large_file_delay: Duration::from_secs(5),
                    large_file_threshold: 50 * MIB as u64,
                    jitter: Duration::from_secs(2),
                }),
                hygiene_pause: Duration::from_secs(5),
                ..base
            },
            Profile::Fast => Self {
                chunk_size: 4 * MIB,
                queue_capacity: 4,
                upload_part_size: 512 * KIB,
                progress_interval: Duration::from_secs(5),
                pacing: None,
                hygiene_pause: Duration::from_secs(2),
                ..base
            },
        }
    }

    /// Size of the producer/consumer buffer in bytes.
    pub fn buffer_bytes(&self) -> usize {
        self.chunk_size * self.queue_capacity
    }

    /// Reject values the transfer core cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CoreError::InvalidConfig("chunk_size must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "queue_capacity must be non-zero".into(),
            ));
        }
        if self.upload_part_size == 0 {
            return Err(CoreError::InvalidConfig(
                "upload_part_size must be non-zero".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(CoreError::InvalidConfig("max_retries must be at least 1".into()));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(CoreError::InvalidConfig(
                "circuit_breaker_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Balanced)
    }
}

/// Deployment overrides, read from JSON or the environment and applied on
/// top of a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub profile: Option<Profile>,
    pub chunk_kib: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub max_retries: Option<u32>,
    pub flood_wait_cap_secs: Option<u64>,
    pub circuit_breaker_threshold: Option<u32>,
    pub progress_interval_secs: Option<u64>,
    pub similarity_threshold: Option<f64>,
}

impl ConfigOverrides {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read `FERRY_*` variables through `lookup`.
    ///
    /// Taking a lookup function keeps this testable without touching the
    /// process environment; production callers pass `|k| std::env::var(k).ok()`.
    pub fn from_env<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
            match value {
                None => Ok(None),
                Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                    CoreError::InvalidConfig(format!("{key}: cannot parse '{raw}'"))
                }),
            }
        }

        let profile = match lookup("FERRY_PROFILE").as_deref().map(str::trim) {
            None => None,
            Some("safe") => Some(Profile::Safe),
            Some("balanced") => Some(Profile::Balanced),
            Some("fast") => Some(Profile::Fast),
            Some(other) => {
                return Err(CoreError::InvalidConfig(format!(
                    "FERRY_PROFILE: unknown profile '{other}'"
                )))
            }
        };

        Ok(Self {
            profile,
            chunk_kib: parse("FERRY_CHUNK_KIB", lookup("FERRY_CHUNK_KIB"))?,
            queue_capacity: parse("FERRY_QUEUE", lookup("FERRY_QUEUE"))?,
            max_retries: parse("FERRY_MAX_RETRIES", lookup("FERRY_MAX_RETRIES"))?,
            flood_wait_cap_secs: parse("FERRY_FLOOD_CAP_SECS", lookup("FERRY_FLOOD_CAP_SECS"))?,
            ..Default::default()
        })
    }

    /// Build the final configuration and validate it.
    pub fn into_config(self) -> Result<RelayConfig> {
        let mut config = RelayConfig::for_profile(self.profile.unwrap_or_default());
        if let Some(kib) = self.chunk_kib {
            config.chunk_size = kib * KIB;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(secs) = self.flood_wait_cap_secs {
            config.flood_wait_cap = Duration::from_secs(secs);
        }
        if let Some(threshold) = self.circuit_breaker_threshold {
            config.circuit_breaker_threshold = threshold;
        }
        if let Some(secs) = self.progress_interval_secs {
            config.progress_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = self.similarity_threshold {
            config.similarity_threshold = threshold;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_profile_geometry() {
        let safe = RelayConfig::for_profile(Profile::Safe);
        assert_eq!(safe.buffer_bytes(), 1024 * 1024);

        let balanced = RelayConfig::default();
        assert_eq!(balanced.profile, Profile::Balanced);
        assert_eq!(balanced.buffer_bytes(), 6 * 1024 * 1024);

        let fast = RelayConfig::for_profile(Profile::Fast);
        assert!(fast.pacing.is_none());
        assert!(fast.hygiene_pause > Duration::ZERO);
    }

    #[test]
    fn test_overrides_from_json() {
        let config = ConfigOverrides::from_json(r#"{"profile":"safe","max_retries":5}"#)
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.profile, Profile::Safe);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.chunk_size, 512 * 1024);
    }

    #[test]
    fn test_overrides_from_env() {
        let env: HashMap<&str, &str> = [("FERRY_PROFILE", "fast"), ("FERRY_CHUNK_KIB", "256")]
            .into_iter()
            .collect();
        let config = ConfigOverrides::from_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.profile, Profile::Fast);
        assert_eq!(config.chunk_size, 256 * 1024);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let result = ConfigOverrides::from_env(|k| {
            (k == "FERRY_QUEUE").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let result = ConfigOverrides {
            queue_capacity: Some(0),
            ..Default::default()
        }
        .into_config();
        assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
    }
}
