//! Pool configuration
//!
//! Defaults are compiled in; embedders can override them from the
//! environment or from a TOML table loaded once at startup.

use serde::Deserialize;

use crate::error::ConfigError;

/// Largest accepted growth shift. Bucket `i` maps `page_size << min(i, shift)`
/// bytes, so this caps a single bucket at 1M pages.
pub const MAX_GROWTH_SHIFT: u32 = 20;

/// Tunables for one [`Colony`](crate::colony::Colony).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColonyConfig {
    /// Ceiling on the number of buckets a pool may hold at once.
    pub max_buckets: usize,
    /// Bucket sizes double up to `page_size << max_growth_shift`, then stay flat.
    pub max_growth_shift: u32,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            max_buckets: 64,
            max_growth_shift: 10,
        }
    }
}

impl ColonyConfig {
    /// Create config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // COLONY_MAX_BUCKETS: bucket ceiling per pool
        if let Some(value) = env_parse::<usize>("COLONY_MAX_BUCKETS") {
            config.max_buckets = value;
        }

        // COLONY_MAX_GROWTH_SHIFT: doubling cap for bucket sizes
        if let Some(value) = env_parse::<u32>("COLONY_MAX_GROWTH_SHIFT") {
            config.max_growth_shift = value;
        }

        config
    }

    /// Parse a config from a TOML document and validate it.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Config for pools that must never grow past their first bucket.
    pub fn fixed() -> Self {
        Self {
            max_buckets: 1,
            max_growth_shift: 0,
        }
    }

    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    pub fn with_max_growth_shift(mut self, shift: u32) -> Self {
        self.max_growth_shift = shift;
        self
    }

    /// Check that the values describe a usable pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_buckets == 0 {
            return Err(ConfigError::Invalid {
                key: "max_buckets",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_growth_shift > MAX_GROWTH_SHIFT {
            return Err(ConfigError::Invalid {
                key: "max_growth_shift",
                reason: format!("must not exceed {}", MAX_GROWTH_SHIFT),
            });
        }
        Ok(())
    }

    /// Number of pages mapped for the bucket at `index`.
    #[inline]
    pub fn bucket_pages(&self, index: usize) -> usize {
        let shift = (index as u64).min(self.max_growth_shift as u64) as u32;
        1usize << shift
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
