//! Engine configuration: serde-backed structs with validation, plus
//! optional file/environment loading.

use crate::core::kmer::{MAX_K, MIN_K};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Default spacing between planted tags, in k-mers.
pub const DEFAULT_TAG_DENSITY: u32 = 40;

/// Default breadth bound for partitioner tag searches.
pub const DEFAULT_SEARCH_BUDGET: usize = 1_000_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// What to do with segments that have no high-degree endpoint at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IslandPolicy {
    /// Materialize island edges eagerly; repair retires them through the
    /// tag index when they are overtaken.
    Emit,
    /// Leave islands out of the edge set entirely.
    #[default]
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactorConfig {
    /// K-mer word length shared with the oracle.
    pub k: usize,
    /// Interior k-mers per planted edge tag.
    pub tag_density: u32,
    pub island_policy: IslandPolicy,
    /// Narrate every repair step at debug level.
    pub update_debug: bool,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            k: 31,
            tag_density: DEFAULT_TAG_DENSITY,
            island_policy: IslandPolicy::default(),
            update_debug: false,
        }
    }
}

impl CompactorConfig {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_K..=MAX_K).contains(&self.k) {
            return Err(ConfigError::Validation {
                field: "k".to_string(),
                reason: format!("must be between {MIN_K} and {MAX_K}"),
            });
        }
        if self.tag_density == 0 {
            return Err(ConfigError::Validation {
                field: "tag_density".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Load from a TOML/JSON/YAML file, with `UNITIG__`-prefixed
    /// environment variables layered on top.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let loaded: Self = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("UNITIG").separator("__"))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        info!(path = %path.as_ref().display(), k = loaded.k, "loaded compactor configuration");
        Ok(loaded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionerConfig {
    /// K-mers per planted sequence tag.
    pub tag_density: u32,
    /// Sizing hint for the Bloom guard.
    pub expected_tags: usize,
    /// Target false-positive rate of the Bloom guard.
    pub bloom_fpp: f64,
    /// Maximum k-mers visited per connected-tag search.
    pub search_budget: usize,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            tag_density: DEFAULT_TAG_DENSITY,
            expected_tags: 1 << 20,
            bloom_fpp: 0.01,
            search_budget: DEFAULT_SEARCH_BUDGET,
        }
    }
}

impl PartitionerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag_density == 0 {
            return Err(ConfigError::Validation {
                field: "tag_density".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.expected_tags == 0 {
            return Err(ConfigError::Validation {
                field: "expected_tags".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.bloom_fpp > 0.0 && self.bloom_fpp < 1.0) {
            return Err(ConfigError::Validation {
                field: "bloom_fpp".to_string(),
                reason: "must lie strictly between 0 and 1".to_string(),
            });
        }
        if self.search_budget == 0 {
            return Err(ConfigError::Validation {
                field: "search_budget".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CompactorConfig::default().validate().is_ok());
        assert!(PartitionerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_k_bounds_rejected() {
        let mut config = CompactorConfig::default();
        config.k = 2;
        assert!(config.validate().is_err());
        config.k = 33;
        assert!(config.validate().is_err());
        config.k = 21;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_bloom_fpp_rejected() {
        let mut config = PartitionerConfig::default();
        config.bloom_fpp = 0.0;
        assert!(config.validate().is_err());
        config.bloom_fpp = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "k = 21\ntag_density = 10\nisland_policy = \"emit\"\nupdate_debug = true\n",
        )
        .unwrap();

        let config = CompactorConfig::from_file(&path).unwrap();
        assert_eq!(config.k, 21);
        assert_eq!(config.tag_density, 10);
        assert_eq!(config.island_policy, IslandPolicy::Emit);
        assert!(config.update_debug);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "k = 99\ntag_density = 10\nisland_policy = \"skip\"\nupdate_debug = false\n",
        )
        .unwrap();
        assert!(CompactorConfig::from_file(&path).is_err());
    }
}
