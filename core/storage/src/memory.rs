//! In-memory blob store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::store::{validate_name, BlobStore};
use sealvault_common::{Error, Result};

/// In-memory blob store.
///
/// Useful for testing and development. All data is lost on drop. Writes
/// can be made to fail on demand to exercise abort paths.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write_atomic` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn poisoned() -> Error {
        Error::Storage("Memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        objects
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", name)))
    }

    async fn write_atomic(&self, name: &str, data: &[u8]) -> Result<()> {
        validate_name(name)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("Simulated write failure".to_string()));
        }
        let mut objects = self.objects.write().map_err(|_| Self::poisoned())?;
        objects.insert(name.to_string(), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut objects = self.objects.write().map_err(|_| Self::poisoned())?;
        objects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", name)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_write_read_delete() {
        let store = MemoryStore::new();
        store.write_atomic("x.vault", b"hello").await.unwrap();

        assert!(store.exists("x.vault").await.unwrap());
        assert_eq!(store.read("x.vault").await.unwrap(), b"hello");

        store.delete("x.vault").await.unwrap();
        assert!(!store.exists("x.vault").await.unwrap());
        assert!(store.delete("x.vault").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_fail_writes_keeps_old_content() {
        let store = MemoryStore::new();
        store.write_atomic("x.vault", b"old").await.unwrap();

        store.set_fail_writes(true);
        assert!(store.write_atomic("x.vault", b"new").await.is_err());
        assert_eq!(store.read("x.vault").await.unwrap(), b"old");
        assert_eq!(store.write_count(), 1);
    }
}
