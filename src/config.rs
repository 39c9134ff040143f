//! Store configuration
//!
//! Every store is built from a [`StoreConfig`]. Defaults match the tuned
//! constants of the in-heap store (16384 rows per block, eight blocks up
//! front, zstd at level 3 every 30 seconds). A config can be assembled with
//! builder setters, parsed from inline TOML, or loaded from a file layered
//! with `ATTRSTORE_*` environment overrides:
//!
//! ```text
//! block_shift = 14
//! compression = "zstd"
//! compression_interval = 30
//! id_strategy = "sequential"
//! ```

use crate::error::{Error, Result};
use crate::id::IdStrategy;
use crate::storage::CompressionAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest and largest accepted `block_shift`
pub const MIN_BLOCK_SHIFT: u32 = 2;
pub const MAX_BLOCK_SHIFT: u32 = 24;

/// Configuration shared by the in-heap and the ordered store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Rows per block as a power of two (default: 14, i.e. 16384 rows)
    pub block_shift: u32,

    /// Blocks allocated when a volume is created (default: 8)
    pub initial_blocks: usize,

    /// Block compression algorithm (default: zstd)
    pub compression: CompressionAlgorithm,

    /// Compression level handed to zstd (default: 3)
    pub compression_level: i32,

    /// Seconds between background compression passes; 0 disables the worker (default: 30)
    pub compression_interval: u64,

    /// Maximum distinct literal strings (default: unbounded)
    pub literal_capacity: Option<u32>,

    /// Maximum distinct attribute keys (default: unbounded, the ordered store
    /// additionally bounds it by the interval capacity)
    pub key_capacity: Option<u32>,

    /// How owner ids are generated (default: sequential)
    pub id_strategy: IdStrategy,

    /// Low bits reserved per owner id (default: 0 for the in-heap store)
    pub interval_shift: u32,

    /// Seconds `finish_pump` waits for the bulk-build thread (default: 300)
    pub pump_timeout: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_shift: 14,
            initial_blocks: 8,
            compression: CompressionAlgorithm::Zstd,
            compression_level: 3,
            compression_interval: 30,
            literal_capacity: None,
            key_capacity: None,
            id_strategy: IdStrategy::Sequential,
            interval_shift: 0,
            pump_timeout: 300,
        }
    }
}

impl StoreConfig {
    /// Defaults for the ordered store: twelve low bits per owner id for key ids
    pub fn ordered() -> Self {
        Self {
            interval_shift: 12,
            ..Default::default()
        }
    }

    /// Parse a TOML document; missing fields keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply `ATTRSTORE_*` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("ATTRSTORE").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                Error::Config(format!("Failed to load config {}: {}", path.display(), e))
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges that would make block or id arithmetic overflow
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCK_SHIFT..=MAX_BLOCK_SHIFT).contains(&self.block_shift) {
            return Err(Error::Config(format!(
                "block_shift must be within {}..={}, got {}",
                MIN_BLOCK_SHIFT, MAX_BLOCK_SHIFT, self.block_shift
            )));
        }
        if self.interval_shift >= 32 {
            return Err(Error::Config(format!(
                "interval_shift must be below 32, got {}",
                self.interval_shift
            )));
        }
        if self.compression == CompressionAlgorithm::Zstd
            && !zstd::compression_level_range().contains(&self.compression_level)
        {
            return Err(Error::Config(format!(
                "compression_level {} is outside the zstd range",
                self.compression_level
            )));
        }
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        1 << self.block_shift
    }

    /// `None` when the background worker is disabled
    pub fn compression_period(&self) -> Option<Duration> {
        (self.compression_interval > 0).then(|| Duration::from_secs(self.compression_interval))
    }

    pub fn pump_timeout(&self) -> Duration {
        Duration::from_secs(self.pump_timeout)
    }

    /// Set rows per block as a power of two
    pub fn block_shift(mut self, shift: u32) -> Self {
        self.block_shift = shift;
        self
    }

    /// Set blocks allocated up front
    pub fn initial_blocks(mut self, blocks: usize) -> Self {
        self.initial_blocks = blocks;
        self
    }

    /// Set block compression algorithm
    pub fn compression(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.compression = algorithm;
        self
    }

    /// Set background compression interval in seconds (0 disables)
    pub fn compression_interval(mut self, seconds: u64) -> Self {
        self.compression_interval = seconds;
        self
    }

    /// Bound the literal pool
    pub fn literal_capacity(mut self, capacity: u32) -> Self {
        self.literal_capacity = Some(capacity);
        self
    }

    /// Bound the key pool
    pub fn key_capacity(mut self, capacity: u32) -> Self {
        self.key_capacity = Some(capacity);
        self
    }

    /// Set owner id strategy
    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Set low bits reserved per owner id
    pub fn interval_shift(mut self, shift: u32) -> Self {
        self.interval_shift = shift;
        self
    }

    /// Set bulk-build wait timeout in seconds
    pub fn pump_timeout_secs(mut self, seconds: u64) -> Self {
        self.pump_timeout = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.block_size(), 16384);
        assert_eq!(config.initial_blocks, 8);
        assert_eq!(config.compression, CompressionAlgorithm::Zstd);
        assert_eq!(config.compression_period(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::default()
            .block_shift(4)
            .initial_blocks(1)
            .compression(CompressionAlgorithm::None)
            .compression_interval(0)
            .literal_capacity(10);

        assert_eq!(config.block_size(), 16);
        assert_eq!(config.initial_blocks, 1);
        assert_eq!(config.compression_period(), None);
        assert_eq!(config.literal_capacity, Some(10));
    }

    #[test]
    fn test_ordered_defaults() {
        assert_eq!(StoreConfig::ordered().interval_shift, 12);
    }

    #[test]
    fn test_from_toml() -> Result<()> {
        let config = StoreConfig::from_toml_str(
            r#"
            block_shift = 10
            compression = "none"
            id_strategy = "sequential-decreasing"
            "#,
        )?;
        assert_eq!(config.block_shift, 10);
        assert_eq!(config.compression, CompressionAlgorithm::None);
        assert_eq!(config.id_strategy, IdStrategy::SequentialDecreasing);
        assert_eq!(config.initial_blocks, 8);
        Ok(())
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            StoreConfig::default().block_shift(1).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            StoreConfig::default().block_shift(25).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            StoreConfig::default().interval_shift(32).validate(),
            Err(Error::Config(_))
        ));
        assert!(StoreConfig::from_toml_str("block_shift = 40").is_err());
    }

    #[test]
    fn test_load_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("attrstore_config_{}.toml", std::process::id()));
        std::fs::write(&path, "initial_blocks = 2\ncompression_interval = 0\n")
            .map_err(|e| Error::Config(e.to_string()))?;

        let config = StoreConfig::load(&path)?;
        assert_eq!(config.initial_blocks, 2);
        assert_eq!(config.compression_period(), None);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}
