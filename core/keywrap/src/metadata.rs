//! Persisted wrapped-key records.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

use crate::platform::KeyPolicy;
use sealvault_common::{Error, Result, VaultId};
use sealvault_storage::BlobStore;

/// Suffix of wrapped-key record objects.
pub const RECORD_SUFFIX: &str = ".keywrap.json";

/// Bookkeeping for the platform key protecting one vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformKeyMetadata {
    pub vault_id: VaultId,
    pub key_alias: String,
    pub key_version: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub rotation_count: u32,
}

/// Metadata plus the vault key as wrapped by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKeyRecord {
    pub metadata: PlatformKeyMetadata,
    pub policy: KeyPolicy,
    #[serde(serialize_with = "to_b64", deserialize_with = "from_b64")]
    pub wrapped_key: Vec<u8>,
}

fn to_b64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn from_b64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Record persistence on top of a blob store.
pub struct RecordStore {
    store: Arc<dyn BlobStore>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    fn object_for(vault_id: &VaultId) -> String {
        format!("{}{}", vault_id, RECORD_SUFFIX)
    }

    pub async fn load(&self, vault_id: &VaultId) -> Result<Option<WrappedKeyRecord>> {
        match self.store.read(&Self::object_for(vault_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::Serialization(e.to_string())),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, record: &WrappedKeyRecord) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store
            .write_atomic(&Self::object_for(&record.metadata.vault_id), &bytes)
            .await
    }

    /// Delete a record. Idempotent.
    pub async fn delete(&self, vault_id: &VaultId) -> Result<()> {
        match self.store.delete(&Self::object_for(vault_id)).await {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Vault ids that currently have a record.
    pub async fn vault_ids(&self) -> Result<Vec<VaultId>> {
        let mut ids = Vec::new();
        for name in self.store.list("").await? {
            if let Some(id) = name.strip_suffix(RECORD_SUFFIX) {
                if let Ok(id) = VaultId::new(id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealvault_storage::MemoryStore;

    fn sample(vault: &str) -> WrappedKeyRecord {
        WrappedKeyRecord {
            metadata: PlatformKeyMetadata {
                vault_id: VaultId::new(vault).unwrap(),
                key_alias: "sealvault.vault-key.0011223344556677.v1".to_string(),
                key_version: 1,
                created_at: Utc::now(),
                last_used: None,
                rotation_count: 0,
            },
            policy: KeyPolicy::ValidityWindow { seconds: 30 },
            wrapped_key: vec![1, 2, 3, 250],
        }
    }

    #[tokio::test]
    async fn test_record_persistence() {
        let records = RecordStore::new(Arc::new(MemoryStore::new()));
        let record = sample("personal");

        records.save(&record).await.unwrap();
        let loaded = records
            .load(&record.metadata.vault_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.metadata, record.metadata);
        assert_eq!(loaded.wrapped_key, record.wrapped_key);
        assert_eq!(loaded.policy, record.policy);
        assert_eq!(records.vault_ids().await.unwrap(), vec![record.metadata.vault_id.clone()]);
    }

    #[tokio::test]
    async fn test_record_delete_idempotent() {
        let records = RecordStore::new(Arc::new(MemoryStore::new()));
        let record = sample("work");
        records.save(&record).await.unwrap();

        records.delete(&record.metadata.vault_id).await.unwrap();
        records.delete(&record.metadata.vault_id).await.unwrap();
        assert!(records.load(&record.metadata.vault_id).await.unwrap().is_none());
    }
}
