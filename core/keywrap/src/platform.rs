//! Platform key store capability.
//!
//! Each platform (secure enclave, Android keystore, OS credential vault)
//! supplies one adapter implementing [`PlatformKeyStore`]. Versioning,
//! rotation and orphan cleanup live in [`crate::KeyWrapBridge`] and never
//! talk to the platform except through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sealvault_common::{Result, SensitiveBytes};

/// How often the platform must re-authenticate the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Every unwrap requires a fresh biometric / device-credential assertion.
    #[default]
    FreshAssertion,
    /// One assertion unlocks the key for a bounded window.
    ValidityWindow { seconds: u32 },
}

impl KeyPolicy {
    /// Whether the bridge must demand a prompt on every unwrap.
    pub fn requires_fresh_assertion(&self) -> bool {
        matches!(self, KeyPolicy::FreshAssertion)
    }
}

/// Secure-element-backed key store.
///
/// Error contract for adapters:
/// - `PlatformKeyUnavailable`: no hardware, nothing enrolled, or the key was
///   invalidated (e.g. biometric set changed)
/// - `AuthenticationCancelled` / `AuthenticationFailed`: user prompt outcome
/// - `PlatformTransient`: a race worth retrying once
/// - anything else is treated as a fatal wrap failure
#[async_trait]
pub trait PlatformKeyStore: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// Whether secure hardware is present and a credential is enrolled.
    async fn is_available(&self) -> bool;

    /// Create a non-exportable key under `alias`.
    async fn create_key(&self, alias: &str, policy: KeyPolicy) -> Result<()>;

    /// Encrypt `secret` with the key under `alias`.
    async fn wrap_secret(&self, alias: &str, secret: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt `wrapped`, prompting the user when `requires_auth` is set.
    async fn unwrap_secret(
        &self,
        alias: &str,
        wrapped: &[u8],
        requires_auth: bool,
    ) -> Result<SensitiveBytes>;

    /// Delete the key under `alias`. Deleting a missing key succeeds.
    async fn delete_key(&self, alias: &str) -> Result<()>;

    /// All aliases currently held by the platform.
    async fn list_keys(&self) -> Result<Vec<String>>;
}
