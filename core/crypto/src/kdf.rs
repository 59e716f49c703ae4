//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use sealvault_common::{Error, Result};

/// Upper bound on memory cost accepted from a container (1 GiB).
///
/// KDF parameters are read from disk before authentication, so an
/// attacker-supplied file must not be able to request unbounded work.
pub const MAX_MEMORY_COST: u32 = 1024 * 1024;

/// Upper bound on iterations accepted from a container.
pub const MAX_TIME_COST: u32 = 16;

/// Upper bound on lanes accepted from a container.
pub const MAX_PARALLELISM: u32 = 16;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// Targets roughly 0.5-1 second of derivation time on a desktop.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Check the parameters against Argon2 constraints and our upper bounds.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(Error::Crypto("Invalid KDF parallelism".to_string()));
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(Error::Crypto("Invalid KDF time cost".to_string()));
        }
        if self.memory_cost < 8 * self.parallelism || self.memory_cost > MAX_MEMORY_COST {
            return Err(Error::Crypto("Invalid KDF memory cost".to_string()));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a key-encryption key from a password and salt using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params` must pass [`KdfParams::validate`]
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
/// - The intermediate buffer is wiped when the returned key is built
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if Argon2id parameters are invalid
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    params.validate()?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    let derived = argon2.hash_password_into(password, salt.as_bytes(), &mut key_bytes);
    let key = MasterKey::from_bytes(key_bytes);
    crate::keys::wipe_key(&mut key_bytes);

    derived.map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_cost: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_default_is_interactive() {
        assert_eq!(KdfParams::default(), KdfParams::interactive());
        assert!(KdfParams::default().validate().is_ok());
    }

    #[test]
    fn test_derive_key_deterministic() {
        let password = b"test-password-123";
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(password, &salt, &fast_params()).unwrap();
        let key2 = derive_key(password, &salt, &fast_params()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let password = b"test-password-123";
        let salt1 = Salt::from_bytes([1u8; 32]);
        let salt2 = Salt::from_bytes([2u8; 32]);

        let key1 = derive_key(password, &salt1, &fast_params()).unwrap();
        let key2 = derive_key(password, &salt2, &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(b"password1", &salt, &fast_params()).unwrap();
        let key2 = derive_key(b"password2", &salt, &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let salt = Salt::generate();
        assert!(derive_key(b"", &salt, &fast_params()).is_err());
    }

    #[test]
    fn test_moderate_preset_derives() {
        let salt = Salt::from_bytes([7u8; 32]);
        assert!(derive_key(b"pw", &salt, &KdfParams::moderate()).is_ok());
    }

    #[test]
    fn test_validate_rejects_hostile_params() {
        let huge = KdfParams {
            memory_cost: u32::MAX,
            time_cost: 1,
            parallelism: 1,
        };
        assert!(huge.validate().is_err());

        let zero_lanes = KdfParams {
            memory_cost: 64,
            time_cost: 1,
            parallelism: 0,
        };
        assert!(zero_lanes.validate().is_err());

        assert!(KdfParams::sensitive().validate().is_ok());
        assert!(KdfParams::interactive().validate().is_ok());
    }
}
