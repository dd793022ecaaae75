// Gzip compression stage

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use super::TransformStage;
use crate::{BackupError, Result};

/// Gzip stage; level is clamped to 0-9
#[derive(Debug, Clone, Copy)]
pub struct GzipStage {
    level: u32,
}

impl GzipStage {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for GzipStage {
    fn default() -> Self {
        Self::new(6)
    }
}

impl TransformStage for GzipStage {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn forward(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| BackupError::Compression(format!("Failed to compress data: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| BackupError::Compression(format!("Failed to finalize compression: {}", e)))
    }

    fn backward(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| BackupError::Compression(format!("Failed to decompress data: {}", e)))?;
        Ok(decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_shrinks_repetitive_input() {
        let stage = GzipStage::default();
        let input = b"card-transaction;".repeat(512);

        let compressed = stage.forward(&input).unwrap();
        assert!(compressed.len() < input.len() / 10);
        assert_eq!(stage.backward(&compressed).unwrap(), input);
    }

    #[test]
    fn test_garbage_is_a_compression_error() {
        let stage = GzipStage::default();
        let err = stage.backward(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, BackupError::Compression(_)));
    }

    #[test]
    fn test_level_is_clamped() {
        assert_eq!(GzipStage::new(42).level(), 9);
    }
}
