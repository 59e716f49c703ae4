//! Blob store trait definition.

use async_trait::async_trait;

use sealvault_common::{Error, Result};

/// Maximum length of an object name.
pub const MAX_NAME_LEN: usize = 200;

/// Flat, named blob storage for vault containers and their side files.
///
/// Every write is atomic: readers observe either the previous content or
/// the new content, never a partial file. The sync layer only ever sees
/// what passes through this trait, which is ciphertext or non-secret
/// metadata.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Read a complete object.
    ///
    /// # Errors
    /// - `NotFound` if no object has this name
    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Replace an object atomically (write-temp-then-rename).
    ///
    /// # Postconditions
    /// - On success the object holds exactly `data`
    /// - On failure the previous content (if any) is untouched
    async fn write_atomic(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Check if an object exists.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Delete an object.
    ///
    /// # Errors
    /// - `NotFound` if no object has this name
    async fn delete(&self, name: &str) -> Result<()>;

    /// List object names starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Check that an object name is safe to use as a single file name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput("Invalid object name length".to_string()));
    }
    if name.starts_with('.') {
        return Err(Error::InvalidInput(
            "Object name cannot start with '.'".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(Error::InvalidInput(
            "Object name may only contain [A-Za-z0-9._-]".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("abc.vault").is_ok());
        assert!(validate_name("registry.json").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
