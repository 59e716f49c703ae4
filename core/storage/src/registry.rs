//! Registry of known vaults.
//!
//! The registry is the only plaintext index in the store. It records which
//! vault identifiers exist and which object holds each container; vault
//! names live inside the encrypted payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::store::BlobStore;
use sealvault_common::{Error, Result, VaultId};

/// Object name of the registry.
pub const REGISTRY_OBJECT: &str = "registry.json";

/// Extension of vault container objects.
pub const VAULT_EXTENSION: &str = "vault";

/// One registered vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: VaultId,
    /// Object holding the container.
    pub object: String,
    pub created_at: DateTime<Utc>,
}

/// Registry persisted as a JSON array in the backing store.
pub struct VaultRegistry {
    store: Arc<dyn BlobStore>,
}

impl VaultRegistry {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Object name of a vault's container.
    pub fn object_for(id: &VaultId) -> String {
        format!("{}.{}", id, VAULT_EXTENSION)
    }

    /// All registered vaults, in registration order.
    pub async fn list(&self) -> Result<Vec<RegistryEntry>> {
        match self.store.read(REGISTRY_OBJECT).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Serialization(e.to_string())),
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Look up one vault.
    pub async fn get(&self, id: &VaultId) -> Result<RegistryEntry> {
        self.list()
            .await?
            .into_iter()
            .find(|entry| &entry.id == id)
            .ok_or_else(|| Error::NotFound(format!("Vault not registered: {}", id)))
    }

    /// Register a vault.
    ///
    /// # Errors
    /// - `AlreadyExists` if the id is already registered
    pub async fn register(&self, id: &VaultId) -> Result<RegistryEntry> {
        let mut entries = self.list().await?;
        if entries.iter().any(|entry| &entry.id == id) {
            return Err(Error::AlreadyExists(format!("Vault already registered: {}", id)));
        }

        let entry = RegistryEntry {
            id: id.clone(),
            object: Self::object_for(id),
            created_at: Utc::now(),
        };
        entries.push(entry.clone());
        self.persist(&entries).await?;

        debug!(vault_id = %id, "Vault registered");
        Ok(entry)
    }

    /// Remove a vault from the registry. Idempotent.
    pub async fn unregister(&self, id: &VaultId) -> Result<()> {
        let mut entries = self.list().await?;
        let before = entries.len();
        entries.retain(|entry| &entry.id != id);
        if entries.len() != before {
            self.persist(&entries).await?;
            debug!(vault_id = %id, "Vault unregistered");
        }
        Ok(())
    }

    async fn persist(&self, entries: &[RegistryEntry]) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(entries).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.write_atomic(REGISTRY_OBJECT, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = VaultRegistry::new(Arc::new(MemoryStore::new()));
        let id = VaultId::new("personal").unwrap();

        let entry = registry.register(&id).await.unwrap();
        assert_eq!(entry.object, "personal.vault");

        let all = registry.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(registry.get(&id).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_register_duplicate_fails() {
        let registry = VaultRegistry::new(Arc::new(MemoryStore::new()));
        let id = VaultId::new("personal").unwrap();

        registry.register(&id).await.unwrap();
        assert!(matches!(
            registry.register(&id).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = VaultRegistry::new(Arc::new(MemoryStore::new()));
        let id = VaultId::new("work").unwrap();

        registry.register(&id).await.unwrap();
        registry.unregister(&id).await.unwrap();
        registry.unregister(&id).await.unwrap();
        assert!(registry.list().await.unwrap().is_empty());
        assert!(registry.get(&id).await.is_err());
    }
}
