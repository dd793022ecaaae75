//! Artifact transform pipeline.
//!
//! Raw exports are compressed first and encrypted second; restores undo the
//! stages in the opposite order. Ciphertext is high-entropy, so running the
//! stages the other way round would make compression useless. The order is
//! therefore not configurable: callers only switch stages on or off.
//!
//! The checksum is taken over the final artifact (post-encryption), so the
//! same value detects corruption in transit, at rest, and in the ciphertext.

pub mod compression;
pub mod encryption;

pub use compression::GzipStage;
pub use encryption::{AesGcmStage, EncryptionKey};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::Result;

/// One reversible step of the pipeline
pub trait TransformStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Applied when writing an artifact
    fn forward(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Undoes [`TransformStage::forward`]
    fn backward(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Which stages are active for one artifact
#[derive(Debug, Clone, Default)]
pub struct TransformConfig {
    /// Gzip level when compression is enabled
    pub compression: Option<u32>,
    pub encryption: Option<EncryptionKey>,
}

impl TransformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = Some(level);
        self
    }

    pub fn with_encryption(mut self, key: EncryptionKey) -> Self {
        self.encryption = Some(key);
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }
}

/// Result of running the pipeline forward
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub artifact: Bytes,
    /// SHA-256 of `artifact`, hex encoded
    pub checksum: String,
    pub raw_size: u64,
    /// `artifact` size divided by raw size
    pub compression_ratio: f64,
}

/// Compress-then-encrypt pipeline
pub struct TransformPipeline {
    stages: Vec<Box<dyn TransformStage>>,
}

impl TransformPipeline {
    /// Assemble the active stages in their fixed order
    pub fn from_config(config: &TransformConfig) -> Self {
        let mut stages: Vec<Box<dyn TransformStage>> = Vec::with_capacity(2);
        if let Some(level) = config.compression {
            stages.push(Box::new(GzipStage::new(level)));
        }
        if let Some(ref key) = config.encryption {
            stages.push(Box::new(AesGcmStage::new(key)));
        }
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage forward and checksum the result.
    ///
    /// A failing stage aborts the whole run; nothing partially transformed is returned.
    pub fn apply(&self, raw: &[u8]) -> Result<TransformOutput> {
        let mut current = raw.to_vec();
        for stage in &self.stages {
            current = stage.forward(&current)?;
            debug!(stage = stage.name(), size = current.len(), "Applied transform stage");
        }

        let raw_size = raw.len() as u64;
        let compression_ratio = if raw_size > 0 {
            current.len() as f64 / raw_size as f64
        } else {
            1.0
        };
        let checksum = checksum(&current);

        Ok(TransformOutput {
            artifact: Bytes::from(current),
            checksum,
            raw_size,
            compression_ratio,
        })
    }

    /// Run every stage backward, last stage first
    pub fn reverse(&self, artifact: &[u8]) -> Result<Bytes> {
        let mut current = artifact.to_vec();
        for stage in self.stages.iter().rev() {
            current = stage.backward(&current)?;
            debug!(stage = stage.name(), size = current.len(), "Reversed transform stage");
        }
        Ok(Bytes::from(current))
    }
}

/// `apply` as a free function
pub fn apply(raw: &[u8], config: &TransformConfig) -> Result<TransformOutput> {
    TransformPipeline::from_config(config).apply(raw)
}

/// `reverse` as a free function
pub fn reverse(artifact: &[u8], config: &TransformConfig) -> Result<Bytes> {
    TransformPipeline::from_config(config).reverse(artifact)
}

/// SHA-256 of `data`, lowercase hex
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
