//! Common error types for SealVault.

use thiserror::Error;

/// Top-level error type for SealVault operations.
///
/// Cryptographic failures are deliberately coarse: a wrong password, a
/// wrong key and a corrupted container all surface as [`Error::WrongSecret`]
/// once they leave the codec.
#[derive(Debug, Error)]
pub enum Error {
    /// No slot of the container could be opened with the supplied secret.
    #[error("Wrong secret")]
    WrongSecret,

    /// Too many failed attempts; retry after the lockout expires.
    #[error("Too many attempts, retry in {remaining_secs} seconds")]
    RateLimited { remaining_secs: u64 },

    /// AEAD tag verification failed.
    #[error("Authentication tag mismatch")]
    Authentication,

    /// Cryptographic operation failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// No secure hardware, or no credential enrolled on this device.
    #[error("Platform key unavailable")]
    PlatformKeyUnavailable,

    /// The user dismissed the biometric / device-credential prompt.
    #[error("Authentication cancelled")]
    AuthenticationCancelled,

    /// The platform rejected the presented credential. Retryable.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Binding the vault key to the platform credential failed.
    #[error("Key wrap failure: {0}")]
    WrapFailure(String),

    /// Transient platform key store race (key busy, store reloading).
    #[error("Platform key store busy: {0}")]
    PlatformTransient(String),

    /// Duress setup aborted; the original vault is untouched.
    #[error("Migration failed: {0}")]
    MigrationFailure(String),

    /// Operation requires an unlocked session.
    #[error("Vault is locked")]
    Locked,

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Message safe to hand to UI / IPC layers.
    ///
    /// Internal detail (paths, library messages) is stripped; callers are
    /// expected to log the full error before crossing the boundary.
    pub fn public_message(&self) -> String {
        match self {
            Error::WrongSecret | Error::Authentication | Error::Crypto(_) => {
                "Wrong password".to_string()
            }
            Error::RateLimited { remaining_secs } => {
                format!("Too many attempts, retry in {} seconds", remaining_secs)
            }
            Error::PlatformKeyUnavailable => "Device unlock is not available".to_string(),
            Error::AuthenticationCancelled => "Authentication cancelled".to_string(),
            Error::AuthenticationFailed => "Authentication failed".to_string(),
            Error::WrapFailure(_) | Error::PlatformTransient(_) => {
                "Device unlock failed".to_string()
            }
            Error::MigrationFailure(_) => "Could not update vault protection".to_string(),
            Error::Locked => "Vault is locked".to_string(),
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => {
                "Could not access vault storage".to_string()
            }
            Error::InvalidInput(msg) => format!("Invalid input: {}", msg),
            Error::NotPermitted(msg) => format!("Not permitted: {}", msg),
            Error::NotFound(_) => "Item not found".to_string(),
            Error::AlreadyExists(_) => "Item already exists".to_string(),
        }
    }

    /// Whether the caller may retry the same action without changing input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed | Error::PlatformTransient(_) | Error::Io(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_paths() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/home/alice/.local/share/sealvault/vaults/abc.vault",
        ));
        assert!(!err.public_message().contains("/home"));

        let err = Error::Storage("rename /tmp/x -> /tmp/y failed".to_string());
        assert!(!err.public_message().contains("/tmp"));
    }

    #[test]
    fn test_crypto_errors_look_alike() {
        assert_eq!(
            Error::WrongSecret.public_message(),
            Error::Authentication.public_message()
        );
        assert_eq!(
            Error::WrongSecret.public_message(),
            Error::Crypto("Ciphertext too short".into()).public_message()
        );
    }

    #[test]
    fn test_rate_limited_reports_remaining_time() {
        let msg = Error::RateLimited { remaining_secs: 42 }.public_message();
        assert!(msg.contains("42"));
    }
}
