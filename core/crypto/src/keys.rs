//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop, so key
//! material is wiped on every exit path including early returns and `?`.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of KDF salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Key-encryption key derived from a password.
///
/// Only ever used to wrap or unwrap a [`VaultKey`]; never encrypts data.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Random data key that encrypts one slot's payload.
///
/// This is the key held by an unlocked session and the key handed to the
/// platform key-wrap bridge.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LENGTH],
}

impl VaultKey {
    /// Create a vault key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a vault key from a slice, e.g. an unwrapped secret.
    ///
    /// # Errors
    /// - Returns error if the slice is not exactly KEY_LENGTH bytes
    pub fn from_slice(bytes: &[u8]) -> sealvault_common::Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            sealvault_common::Error::Crypto(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Generate a random vault key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Zero the key in place. The key is unusable afterwards.
    pub fn wipe(&mut self) {
        wipe_key(&mut self.key);
    }

    /// Whether the key has been wiped (all bytes zero).
    pub fn is_wiped(&self) -> bool {
        self.key.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a decoded slice.
    pub fn from_slice(bytes: &[u8]) -> sealvault_common::Result<Self> {
        let salt: [u8; SALT_LENGTH] = bytes.try_into().map_err(|_| {
            sealvault_common::Error::Crypto("Invalid salt length".to_string())
        })?;
        Ok(Self(salt))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// Zero a key buffer.
///
/// Uses volatile writes so the compiler cannot elide the store.
pub fn wipe_key(key: &mut [u8]) {
    key.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wipe_key_zeroes_buffer() {
        let mut buf = [0xA5u8; KEY_LENGTH];
        wipe_key(&mut buf);
        assert!(buf.iter().all(|b| *b == 0));

        let mut heap = vec![7u8; 64];
        wipe_key(&mut heap);
        assert!(heap.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_vault_key_wipe() {
        let mut key = VaultKey::generate();
        assert!(!key.is_wiped());
        key.wipe();
        assert!(key.is_wiped());
        assert_eq!(key.as_bytes(), &[0u8; KEY_LENGTH]);
    }

    #[test]
    fn test_vault_key_generate() {
        let key1 = VaultKey::generate();
        let key2 = VaultKey::generate();

        // Random keys should be different
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_vault_key_from_slice_length() {
        assert!(VaultKey::from_slice(&[1u8; KEY_LENGTH]).is_ok());
        assert!(VaultKey::from_slice(&[1u8; 16]).is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = VaultKey::from_bytes([0x41; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "VaultKey([REDACTED])");
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        // Random salts should be different
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }
}
