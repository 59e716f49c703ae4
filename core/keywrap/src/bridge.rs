//! Versioned platform key wrapping.
//!
//! The bridge binds a vault key to a platform credential so the vault can
//! be unlocked by biometrics or a device PIN without ever persisting the
//! master password. Each vault owns at most one live platform key, named
//! `"{purpose}.{vault tag}.v{version}"`. The vault tag is a short BLAKE2b
//! digest of the vault id, so aliases never collide across vaults and never
//! reveal vault ids to other apps enumerating the key store.

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::metadata::{PlatformKeyMetadata, RecordStore, WrappedKeyRecord};
use crate::platform::{KeyPolicy, PlatformKeyStore};
use sealvault_common::{Error, Result, VaultId};
use sealvault_crypto::VaultKey;
use sealvault_storage::BlobStore;

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Alias prefix shared by every key this bridge creates.
    pub purpose: String,
    /// Age after which [`KeyWrapBridge::should_auto_rotate`] reports true.
    pub rotation_interval_days: i64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            purpose: "sealvault.vault-key".to_string(),
            rotation_interval_days: 90,
        }
    }
}

/// Platform key-wrap bridge.
pub struct KeyWrapBridge {
    platform: Arc<dyn PlatformKeyStore>,
    records: RecordStore,
    config: BridgeConfig,
}

/// Run a platform call, retrying once on a transient race.
async fn retry_once<T, F, Fut>(operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Err(Error::PlatformTransient(reason)) => {
            warn!(operation, reason = %reason, "Transient platform error, retrying once");
            f().await
        }
        other => other,
    }
}

/// Keep the user-facing taxonomy, collapse everything else into `WrapFailure`.
fn classify(err: Error, operation: &str) -> Error {
    match err {
        Error::PlatformKeyUnavailable
        | Error::AuthenticationCancelled
        | Error::AuthenticationFailed => err,
        other => {
            error!(operation, error = %other, "Platform key operation failed");
            Error::WrapFailure(operation.to_string())
        }
    }
}

impl KeyWrapBridge {
    pub fn new(platform: Arc<dyn PlatformKeyStore>, store: Arc<dyn BlobStore>) -> Self {
        Self::with_config(platform, store, BridgeConfig::default())
    }

    pub fn with_config(
        platform: Arc<dyn PlatformKeyStore>,
        store: Arc<dyn BlobStore>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            platform,
            records: RecordStore::new(store),
            config,
        }
    }

    /// Whether the platform can hold keys right now.
    pub async fn is_available(&self) -> bool {
        self.platform.is_available().await
    }

    fn vault_tag(vault_id: &VaultId) -> String {
        let mut hasher = Blake2b::<U8>::new();
        hasher.update(b"sealvault-alias");
        hasher.update(vault_id.as_str().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    fn alias_prefix(&self, vault_id: &VaultId) -> String {
        format!("{}.{}.v", self.config.purpose, Self::vault_tag(vault_id))
    }

    /// Alias of `version` of the platform key for `vault_id`.
    pub fn alias_for(&self, vault_id: &VaultId, version: u32) -> String {
        format!("{}{}", self.alias_prefix(vault_id), version)
    }

    /// Platform aliases belonging to this vault, with their versions.
    async fn platform_versions(&self, vault_id: &VaultId) -> Result<Vec<(String, u32)>> {
        let prefix = self.alias_prefix(vault_id);
        let keys = retry_once("list_keys", || self.platform.list_keys())
            .await
            .map_err(|e| classify(e, "list_keys"))?;
        Ok(keys
            .into_iter()
            .filter_map(|alias| {
                let version = alias.strip_prefix(&prefix)?.parse::<u32>().ok()?;
                Some((alias, version))
            })
            .collect())
    }

    async fn ensure_available(&self) -> Result<()> {
        if self.platform.is_available().await {
            Ok(())
        } else {
            Err(Error::PlatformKeyUnavailable)
        }
    }

    /// Delete every platform key of this vault except `keep`.
    async fn delete_other_versions(&self, vault_id: &VaultId, keep: u32) {
        let versions = match self.platform_versions(vault_id).await {
            Ok(versions) => versions,
            Err(e) => {
                warn!(vault_id = %vault_id, error = %e, "Could not list platform keys");
                return;
            }
        };
        for (alias, version) in versions {
            if version == keep {
                continue;
            }
            match retry_once("delete_key", || self.platform.delete_key(&alias)).await {
                Ok(()) => debug!(vault_id = %vault_id, version, "Old platform key deleted"),
                Err(e) => warn!(vault_id = %vault_id, version, error = %e, "Old platform key left behind"),
            }
        }
    }

    /// Create `version`, wrap the key and persist the record.
    ///
    /// On any failure the new platform key is removed again, so nothing
    /// half-installed survives.
    async fn install(
        &self,
        vault_id: &VaultId,
        vault_key: &VaultKey,
        policy: KeyPolicy,
        version: u32,
        rotation_count: u32,
    ) -> Result<PlatformKeyMetadata> {
        let alias = self.alias_for(vault_id, version);

        retry_once("create_key", || self.platform.create_key(&alias, policy))
            .await
            .map_err(|e| classify(e, "create_key"))?;

        let wrapped = match retry_once("wrap_secret", || {
            self.platform.wrap_secret(&alias, vault_key.as_bytes())
        })
        .await
        {
            Ok(wrapped) => wrapped,
            Err(e) => {
                self.discard(&alias).await;
                return Err(classify(e, "wrap_secret"));
            }
        };

        let metadata = PlatformKeyMetadata {
            vault_id: vault_id.clone(),
            key_alias: alias.clone(),
            key_version: version,
            created_at: Utc::now(),
            last_used: None,
            rotation_count,
        };
        let record = WrappedKeyRecord {
            metadata: metadata.clone(),
            policy,
            wrapped_key: wrapped,
        };

        if let Err(e) = self.records.save(&record).await {
            self.discard(&alias).await;
            return Err(classify(e, "save_record"));
        }

        Ok(metadata)
    }

    async fn discard(&self, alias: &str) {
        if let Err(e) = self.platform.delete_key(alias).await {
            warn!(error = %e, "Could not remove half-installed platform key");
        }
    }

    async fn next_version(&self, vault_id: &VaultId, current: Option<&WrappedKeyRecord>) -> Result<u32> {
        let from_record = current.map(|r| r.metadata.key_version).unwrap_or(0);
        let from_platform = self
            .platform_versions(vault_id)
            .await?
            .into_iter()
            .map(|(_, v)| v)
            .max()
            .unwrap_or(0);
        from_record
            .max(from_platform)
            .checked_add(1)
            .ok_or_else(|| Error::WrapFailure("key version exhausted".to_string()))
    }

    /// Bind `vault_key` to a fresh platform key.
    ///
    /// Any previous version for this vault is deleted once the new wrap and
    /// its record are persisted.
    pub async fn wrap_key(
        &self,
        vault_id: &VaultId,
        vault_key: &VaultKey,
        policy: KeyPolicy,
    ) -> Result<PlatformKeyMetadata> {
        self.ensure_available().await?;

        let current = self.records.load(vault_id).await?;
        let version = self.next_version(vault_id, current.as_ref()).await?;
        let metadata = self.install(vault_id, vault_key, policy, version, 0).await?;
        self.delete_other_versions(vault_id, version).await;

        info!(vault_id = %vault_id, version, "Platform unlock enrolled");
        Ok(metadata)
    }

    /// Re-wrap under a new key version, keeping the policy.
    ///
    /// The previous platform key is deleted only after the new wrap and
    /// record write both succeed; until then the old key keeps working.
    pub async fn rotate_key(&self, vault_id: &VaultId, vault_key: &VaultKey) -> Result<PlatformKeyMetadata> {
        self.ensure_available().await?;

        let current = self
            .records
            .load(vault_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No platform key for vault {}", vault_id)))?;

        let version = self.next_version(vault_id, Some(&current)).await?;
        let metadata = self
            .install(
                vault_id,
                vault_key,
                current.policy,
                version,
                current.metadata.rotation_count.saturating_add(1),
            )
            .await?;
        self.delete_other_versions(vault_id, version).await;

        info!(vault_id = %vault_id, version, "Platform key rotated");
        Ok(metadata)
    }

    /// Recover the vault key through the platform credential.
    pub async fn unwrap_key(&self, vault_id: &VaultId) -> Result<VaultKey> {
        self.ensure_available().await?;

        let Some(mut record) = self.records.load(vault_id).await? else {
            // Platform keys without a record are useless; clear them.
            self.delete_other_versions(vault_id, 0).await;
            return Err(Error::PlatformKeyUnavailable);
        };

        let alias = record.metadata.key_alias.clone();
        let present = self
            .platform_versions(vault_id)
            .await?
            .iter()
            .any(|(a, _)| a == &alias);
        if !present {
            warn!(vault_id = %vault_id, "Wrapped key has no platform key, removing record");
            self.records.delete(vault_id).await?;
            return Err(Error::PlatformKeyUnavailable);
        }

        let requires_auth = record.policy.requires_fresh_assertion();
        let secret = match retry_once("unwrap_secret", || {
            self.platform
                .unwrap_secret(&alias, &record.wrapped_key, requires_auth)
        })
        .await
        {
            Ok(secret) => secret,
            Err(Error::PlatformKeyUnavailable) => {
                // Key invalidated by the platform (e.g. biometrics re-enrolled).
                warn!(vault_id = %vault_id, "Platform key invalidated, revoking");
                self.revoke_all_keys(vault_id).await?;
                return Err(Error::PlatformKeyUnavailable);
            }
            Err(e) => return Err(classify(e, "unwrap_secret")),
        };

        let key = VaultKey::from_slice(secret.as_bytes()).map_err(|e| classify(e, "unwrap_secret"))?;

        record.metadata.last_used = Some(Utc::now());
        if let Err(e) = self.records.save(&record).await {
            warn!(vault_id = %vault_id, error = %e, "Could not update last-used time");
        }

        debug!(vault_id = %vault_id, "Vault key unwrapped");
        Ok(key)
    }

    /// Delete every platform key and the record for a vault. Idempotent.
    pub async fn revoke_all_keys(&self, vault_id: &VaultId) -> Result<()> {
        for (alias, _) in self.platform_versions(vault_id).await? {
            retry_once("delete_key", || self.platform.delete_key(&alias))
                .await
                .map_err(|e| classify(e, "delete_key"))?;
        }
        self.records.delete(vault_id).await?;
        info!(vault_id = %vault_id, "Platform keys revoked");
        Ok(())
    }

    /// Current platform key metadata, if the vault is enrolled.
    pub async fn status(&self, vault_id: &VaultId) -> Result<Option<PlatformKeyMetadata>> {
        Ok(self.records.load(vault_id).await?.map(|r| r.metadata))
    }

    /// Advisory flag: the key is older than the rotation interval.
    ///
    /// Rotation itself is always an explicit call to [`Self::rotate_key`].
    pub async fn should_auto_rotate(&self, vault_id: &VaultId) -> Result<bool> {
        self.should_auto_rotate_at(vault_id, Utc::now()).await
    }

    pub async fn should_auto_rotate_at(&self, vault_id: &VaultId, now: DateTime<Utc>) -> Result<bool> {
        let Some(metadata) = self.status(vault_id).await? else {
            return Ok(false);
        };
        let interval = Duration::days(self.config.rotation_interval_days);
        Ok(now.signed_duration_since(metadata.created_at) >= interval)
    }

    /// Reconcile platform keys with records.
    ///
    /// Deletes platform keys that have no matching record (or a stale
    /// version), and records whose platform key is gone. Returns the number
    /// of inconsistent items removed.
    pub async fn heal_orphans(&self) -> Result<usize> {
        let prefix = format!("{}.", self.config.purpose);
        let keys = retry_once("list_keys", || self.platform.list_keys())
            .await
            .map_err(|e| classify(e, "list_keys"))?;

        let mut live_aliases = Vec::new();
        let mut removed = 0;

        for vault_id in self.records.vault_ids().await? {
            let Some(record) = self.records.load(&vault_id).await? else {
                continue;
            };
            if keys.contains(&record.metadata.key_alias) {
                live_aliases.push(record.metadata.key_alias);
            } else {
                warn!(vault_id = %vault_id, "Removing record without platform key");
                self.records.delete(&vault_id).await?;
                removed += 1;
            }
        }

        for alias in keys.iter().filter(|a| a.starts_with(&prefix)) {
            if live_aliases.contains(alias) {
                continue;
            }
            warn!("Removing orphaned platform key");
            retry_once("delete_key", || self.platform.delete_key(alias))
                .await
                .map_err(|e| classify(e, "delete_key"))?;
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "Platform key orphans healed");
        }
        Ok(removed)
    }
}
