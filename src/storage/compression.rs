//! Compression support for block storage

use super::volume::VolumeStats;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    #[default]
    Zstd,
}

/// Algorithm plus level, as configured for a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub algorithm: CompressionAlgorithm,
    pub level: i32,
}

impl Compression {
    pub fn new(algorithm: CompressionAlgorithm, level: i32) -> Self {
        Self { algorithm, level }
    }

    pub fn none() -> Self {
        Self::new(CompressionAlgorithm::None, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::new(CompressionAlgorithm::Zstd, 3)
    }
}

/// Compress data using the configured algorithm
pub fn compress(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression.algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => zstd::bulk::compress(data, compression.level)
            .map_err(|e| Error::Compression(format!("Failed to compress: {}", e))),
    }
}

/// Decompress data; `expected_len` is the exact uncompressed size
pub fn decompress(data: &[u8], compression: Compression, expected_len: usize) -> Result<Vec<u8>> {
    let decoded = match compression.algorithm {
        CompressionAlgorithm::None => data.to_vec(),
        CompressionAlgorithm::Zstd => zstd::bulk::decompress(data, expected_len)
            .map_err(|e| Error::Compression(format!("Failed to decompress: {}", e)))?,
    };
    if decoded.len() != expected_len {
        return Err(Error::Compression(format!(
            "Decompressed {} bytes, expected {}",
            decoded.len(),
            expected_len
        )));
    }
    Ok(decoded)
}

/// Stored versus inflated bytes of a set of volumes
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompressionStats {
    pub raw_bytes: usize,
    pub stored_bytes: usize,
    /// `stored / raw`, 1.0 for an empty store
    pub ratio: f64,
    pub saved_percent: f64,
}

impl CompressionStats {
    pub fn from_volumes(volumes: &VolumeStats) -> Self {
        let ratio = match volumes.raw_bytes {
            0 => 1.0,
            raw => volumes.bytes as f64 / raw as f64,
        };
        Self {
            raw_bytes: volumes.raw_bytes,
            stored_bytes: volumes.bytes,
            ratio,
            saved_percent: (1.0 - ratio) * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_none() -> Result<()> {
        let data = b"Hello, World!";
        let compressed = compress(data, Compression::none())?;
        assert_eq!(compressed, data);

        let decompressed = decompress(&compressed, Compression::none(), data.len())?;
        assert_eq!(decompressed, data);
        Ok(())
    }

    #[test]
    fn test_compression_zstd() -> Result<()> {
        // Mostly-empty block payload, the common case
        let mut data = vec![0u8; 4096];
        data[17] = 0x40;
        let compressed = compress(&data, Compression::default())?;
        assert!(compressed.len() < data.len() / 10);

        let decompressed = decompress(&compressed, Compression::default(), data.len())?;
        assert_eq!(decompressed, data);
        Ok(())
    }

    #[test]
    fn test_decompress_length_mismatch() -> Result<()> {
        let compressed = compress(&[1, 2, 3], Compression::none())?;
        assert!(matches!(
            decompress(&compressed, Compression::none(), 4),
            Err(Error::Compression(_))
        ));
        Ok(())
    }

    #[test]
    fn test_compression_stats_from_volumes() {
        let stats = CompressionStats::from_volumes(&VolumeStats {
            blocks: 4,
            compressed_blocks: 3,
            bytes: 1_024,
            raw_bytes: 4_096,
        });
        assert_eq!(stats.ratio, 0.25);
        assert_eq!(stats.saved_percent, 75.0);

        let empty = CompressionStats::from_volumes(&VolumeStats::default());
        assert_eq!(empty.ratio, 1.0);
        assert_eq!(empty.saved_percent, 0.0);
    }
}
