//! Session and rate-limit configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use sealvault_common::{Error, Result};
use sealvault_crypto::KdfParams;

/// Smallest allowed payload bucket.
pub const MIN_PAYLOAD_BUCKET: usize = 256;

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Attempt limits for secret-verifying operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Failures tolerated inside `window` before locking out.
    pub max_attempts: u32,
    #[serde(with = "secs")]
    pub window: Duration,
    #[serde(with = "secs")]
    pub lockout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(5 * 60),
            lockout: Duration::from_secs(5 * 60),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.window.is_zero() || self.lockout.is_zero() {
            return Err(Error::InvalidInput(
                "Rate limit window and lockout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables for [`crate::SessionManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity period after which the session locks itself.
    #[serde(with = "secs")]
    pub auto_lock: Duration,
    /// How long before auto-lock the warning event fires.
    #[serde(with = "secs")]
    pub auto_lock_warning: Duration,
    /// Quiet period before a mutation is written to storage.
    #[serde(with = "millis")]
    pub save_debounce: Duration,
    /// KDF cost for new vaults and slots.
    pub kdf_params: KdfParams,
    /// Plaintext payloads are padded to a multiple of this many bytes.
    pub payload_bucket: usize,
    pub rate_limit: RateLimitConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_lock: Duration::from_secs(5 * 60),
            auto_lock_warning: Duration::from_secs(30),
            save_debounce: Duration::from_secs(1),
            kdf_params: KdfParams::default(),
            payload_bucket: 4096,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.auto_lock.is_zero() {
            return Err(Error::InvalidInput("auto_lock must be non-zero".to_string()));
        }
        if self.payload_bucket < MIN_PAYLOAD_BUCKET {
            return Err(Error::InvalidInput(format!(
                "payload_bucket must be at least {}",
                MIN_PAYLOAD_BUCKET
            )));
        }
        self.kdf_params.validate()?;
        self.rate_limit.validate()
    }
}
