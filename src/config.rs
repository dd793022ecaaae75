// Engine configuration - defaults, builder methods and BACKUP_ENGINE_* overrides

use std::str::FromStr;
use std::time::Duration;

use crate::transform::EncryptionKey;
use crate::{BackupError, Result};

const ENV_PREFIX: &str = "BACKUP_ENGINE_";

/// Retry behaviour for transient adapter failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based): `min(attempt * base, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt)
            .min(self.max_delay)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000), Duration::from_millis(30_000))
    }
}

/// Runtime settings for a [`crate::BackupEngine`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Jobs allowed to run at once; further calls queue
    pub concurrency: usize,
    pub lock_timeout: Duration,
    pub backup_timeout: Duration,
    pub restore_timeout: Duration,
    pub progress_interval: Duration,
    pub retry: RetryPolicy,
    pub compression_level: u32,
    /// Needed for any request that asks for encryption
    pub encryption_key: Option<EncryptionKey>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            lock_timeout: Duration::from_secs(30),
            backup_timeout: Duration::from_secs(3600),
            restore_timeout: Duration::from_secs(3600),
            progress_interval: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
            compression_level: 6,
            encryption_key: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `BACKUP_ENGINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`EngineConfig::from_env`], reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(value) = parse::<usize>(&get, "CONCURRENCY")? {
            config.concurrency = value;
        }
        if let Some(secs) = parse::<u64>(&get, "LOCK_TIMEOUT_SECS")? {
            config.lock_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&get, "BACKUP_TIMEOUT_SECS")? {
            config.backup_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&get, "RESTORE_TIMEOUT_SECS")? {
            config.restore_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>(&get, "PROGRESS_INTERVAL_MS")? {
            config.progress_interval = Duration::from_millis(ms);
        }
        if let Some(retries) = parse::<u32>(&get, "MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = parse::<u64>(&get, "RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&get, "RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(level) = parse::<u32>(&get, "COMPRESSION_LEVEL")? {
            config.compression_level = level;
        }
        if let Some(encoded) = get("ENCRYPTION_KEY") {
            config.encryption_key = Some(EncryptionKey::from_base64(encoded.trim())?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BackupError::ConfigValidation(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(BackupError::ConfigValidation(format!(
                "compression level {} is outside 0-9",
                self.compression_level
            )));
        }
        if self.progress_interval.is_zero() {
            return Err(BackupError::ConfigValidation(
                "progress interval must be positive".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(BackupError::ConfigValidation(format!(
                "retry base delay {:?} exceeds max delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        Ok(())
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_backup_timeout(mut self, timeout: Duration) -> Self {
        self.backup_timeout = timeout;
        self
    }

    pub fn with_restore_timeout(mut self, timeout: Duration) -> Self {
        self.restore_timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            BackupError::ConfigValidation(format!("{}{}={:?}: {}", ENV_PREFIX, name, raw, e))
        }),
    }
}
