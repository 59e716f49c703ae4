//! Vault session management.
//!
//! [`SessionManager`] owns at most one unlocked vault at a time. While
//! unlocked it holds the decrypted structure, the vault key and the active
//! slot index, and nothing else that could distinguish a real session from a
//! decoy one. Locking flushes pending edits and zeroizes all of it.
//!
//! Every call made while unlocked restarts the auto-lock timer. Mutations
//! are persisted after a debounce period, or immediately via
//! [`SessionManager::force_save`].

use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::config::SessionConfig;
use crate::events::{EventBus, SessionEvent};
use crate::format::{self, OpenedVault, VaultFile, DECOY_SLOT};
use crate::model::VaultData;
use crate::rate_limit::{OperationClass, RateLimiter};
use crate::timer::DelayedTask;
use sealvault_common::{Error, Result, VaultId};
use sealvault_crypto::VaultKey;
use sealvault_keywrap::{KeyPolicy, KeyWrapBridge, PlatformKeyMetadata};
use sealvault_storage::{BlobStore, RegistryEntry, VaultRegistry};

/// State of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No vault is open; no key material is held.
    Locked,
    /// A secret is being verified.
    Unlocking,
    /// A vault is open.
    Unlocked,
}

/// The unlocked vault. Wiped on drop.
pub(crate) struct ActiveVault {
    pub(crate) vault_id: VaultId,
    object: String,
    pub(crate) data: VaultData,
    key: VaultKey,
    active_slot: usize,
    file: VaultFile,
    pub(crate) dirty: bool,
}

impl Drop for ActiveVault {
    fn drop(&mut self) {
        self.data.zeroize();
        self.key.wipe();
    }
}

#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) vault: Option<ActiveVault>,
    auto_lock: Option<DelayedTask>,
    pending_save: Option<DelayedTask>,
    auto_lock_epoch: u64,
    save_epoch: u64,
}

pub(crate) struct Shared {
    store: Arc<dyn BlobStore>,
    registry: VaultRegistry,
    bridge: Option<Arc<KeyWrapBridge>>,
    limiter: RateLimiter,
    config: SessionConfig,
    events: EventBus,
    state: watch::Sender<SessionState>,
    pub(crate) inner: Mutex<Inner>,
}

/// Run CPU-heavy crypto (Argon2id) off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Crypto(format!("Worker task failed: {}", e)))?
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn report(&self, action: &str, err: &Error) {
        self.events.emit(SessionEvent::Error {
            action: action.to_string(),
            message: err.public_message(),
        });
    }

    /// Encrypt and persist the active vault if it has unsaved changes.
    async fn flush(&self, inner: &mut Inner) -> Result<()> {
        let Some(vault) = inner.vault.as_mut() else {
            return Ok(());
        };
        if !vault.dirty {
            return Ok(());
        }
        let next = format::save(
            &vault.file,
            &vault.data,
            &vault.key,
            vault.active_slot,
            self.config.payload_bucket,
        )?;
        format::write_file(&self.store, &vault.object, &next).await?;
        vault.file = next;
        vault.dirty = false;
        debug!(vault_id = %vault.vault_id, "Vault saved");
        Ok(())
    }

    /// Stop timers and drop the active vault, optionally flushing first.
    async fn close(&self, inner: &mut Inner, flush: bool) {
        inner.auto_lock_epoch += 1;
        inner.save_epoch += 1;
        inner.auto_lock = None;
        inner.pending_save = None;

        if inner.vault.is_none() {
            self.set_state(SessionState::Locked);
            return;
        }
        if flush {
            if let Err(e) = self.flush(inner).await {
                error!(error = %e, "Failed to save vault before locking");
                self.report("save", &e);
            }
        }
        if let Some(vault) = inner.vault.take() {
            info!(vault_id = %vault.vault_id, "Vault locked");
        }
        self.set_state(SessionState::Locked);
        self.events.emit(SessionEvent::Locked);
    }

    fn install(self: &Arc<Self>, inner: &mut Inner, vault_id: &VaultId, opened: OpenedVault) {
        let OpenedVault {
            data,
            key,
            active_slot,
            file,
        } = opened;
        let name = data.metadata.name.clone();

        inner.vault = Some(ActiveVault {
            vault_id: vault_id.clone(),
            object: VaultRegistry::object_for(vault_id),
            data,
            key,
            active_slot,
            file,
            dirty: false,
        });
        self.set_state(SessionState::Unlocked);
        self.arm_auto_lock(inner);

        info!(vault_id = %vault_id, "Vault unlocked");
        self.events.emit(SessionEvent::Unlocked {
            vault_id: vault_id.clone(),
            name,
            is_decoy: active_slot == DECOY_SLOT,
        });
    }

    /// Restart the inactivity timer, including its warning.
    pub(crate) fn arm_auto_lock(self: &Arc<Self>, inner: &mut Inner) {
        inner.auto_lock_epoch += 1;
        let epoch = inner.auto_lock_epoch;
        let total = self.config.auto_lock;
        let lead = self.config.auto_lock_warning.min(total);
        let weak = Arc::downgrade(self);

        inner.auto_lock = Some(DelayedTask::schedule(total - lead, async move {
            if !lead.is_zero() {
                let Some(shared) = weak.upgrade() else { return };
                if shared.inner.lock().await.auto_lock_epoch != epoch {
                    return;
                }
                shared.events.emit(SessionEvent::AutoLockWarning {
                    seconds_remaining: lead.as_secs(),
                });
                drop(shared);
                tokio::time::sleep(lead).await;
            }
            if let Some(shared) = weak.upgrade() {
                shared.auto_lock_fired(epoch).await;
            }
        }));
    }

    async fn auto_lock_fired(&self, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.auto_lock_epoch != epoch {
            return;
        }
        if let Some(task) = inner.auto_lock.take() {
            task.disarm();
        }
        info!("Locking vault after inactivity");
        self.close(&mut inner, true).await;
    }

    /// (Re)start the save debounce.
    pub(crate) fn schedule_save(self: &Arc<Self>, inner: &mut Inner) {
        inner.save_epoch += 1;
        let epoch = inner.save_epoch;
        let weak = Arc::downgrade(self);
        inner.pending_save = Some(DelayedTask::schedule(self.config.save_debounce, async move {
            if let Some(shared) = weak.upgrade() {
                shared.save_fired(epoch).await;
            }
        }));
    }

    async fn save_fired(&self, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.save_epoch != epoch {
            return;
        }
        if let Some(task) = inner.pending_save.take() {
            task.disarm();
        }
        if let Err(e) = self.flush(&mut inner).await {
            error!(error = %e, "Background save failed");
            self.report("save", &e);
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    /// Verify `secret` against the active slot, counting failures.
    async fn verify_active(&self, inner: &Inner, op: OperationClass, secret: &[u8]) -> Result<()> {
        let vault = inner.vault.as_ref().ok_or(Error::Locked)?;
        self.limiter.check(&vault.vault_id, op)?;

        let file = vault.file.clone();
        let slot = vault.active_slot;
        let secret = Zeroizing::new(secret.to_vec());
        match blocking(move || format::verify_slot(&file, slot, &secret)).await {
            Ok(()) => self.limiter.record_success(&vault.vault_id, op),
            Err(e) => {
                if matches!(e, Error::WrongSecret) {
                    self.limiter.record_failure(&vault.vault_id, op)?;
                }
                Err(e)
            }
        }
    }
}

/// Single-session vault lifecycle manager.
pub struct SessionManager {
    pub(crate) shared: Arc<Shared>,
}

impl SessionManager {
    /// Manager without platform unlock support.
    pub fn new(store: Arc<dyn BlobStore>, config: SessionConfig) -> Self {
        Self::build(store, config, None)
    }

    /// Manager that can enroll and use platform-wrapped vault keys.
    pub fn with_key_bridge(
        store: Arc<dyn BlobStore>,
        config: SessionConfig,
        bridge: Arc<KeyWrapBridge>,
    ) -> Self {
        Self::build(store, config, Some(bridge))
    }

    fn build(
        store: Arc<dyn BlobStore>,
        config: SessionConfig,
        bridge: Option<Arc<KeyWrapBridge>>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Locked);
        Self {
            shared: Arc::new(Shared {
                registry: VaultRegistry::new(store.clone()),
                store,
                bridge,
                limiter: RateLimiter::new(config.rate_limit.clone()),
                config,
                events: EventBus::new(),
                state,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Id of the unlocked vault, if any.
    pub async fn active_vault(&self) -> Option<VaultId> {
        let mut inner = self.shared.inner.lock().await;
        let vault_id = inner.vault.as_ref().map(|v| v.vault_id.clone());
        if vault_id.is_some() {
            self.shared.arm_auto_lock(&mut inner);
        }
        vault_id
    }

    pub async fn list_vaults(&self) -> Result<Vec<RegistryEntry>> {
        self.shared.registry.list().await
    }

    /// Create and register a new vault. The session state is unchanged.
    pub async fn create_vault(&self, name: &str, password: &[u8]) -> Result<VaultId> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("Vault name cannot be empty".to_string()));
        }
        let shared = &self.shared;
        let vault_id = VaultId::new(Uuid::new_v4().simple().to_string())?;
        let data = VaultData::new(name);
        let password = Zeroizing::new(password.to_vec());
        let params = shared.config.kdf_params.clone();
        let bucket = shared.config.payload_bucket;

        let (file, _key) = blocking(move || format::create(&data, &password, &params, bucket)).await?;
        let object = VaultRegistry::object_for(&vault_id);
        format::write_file(&shared.store, &object, &file).await?;

        if let Err(e) = shared.registry.register(&vault_id).await {
            if let Err(cleanup) = shared.store.delete(&object).await {
                warn!(vault_id = %vault_id, error = %cleanup, "Could not remove unregistered vault");
            }
            return Err(e);
        }

        info!(vault_id = %vault_id, "Vault created");
        Ok(vault_id)
    }

    /// Unlock a vault with its password.
    ///
    /// Any other unlocked vault is locked first. A wrong password, a corrupt
    /// container and a password for no slot all yield `WrongSecret` and
    /// count towards the rate limit.
    ///
    /// # Errors
    /// - `RateLimited` while locked out, even for the correct password
    /// - `WrongSecret`
    /// - `NotFound` if the container does not exist
    pub async fn unlock(&self, vault_id: &VaultId, password: &[u8]) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        shared.limiter.check(vault_id, OperationClass::Unlock)?;

        shared.close(&mut inner, true).await;
        shared.set_state(SessionState::Unlocking);

        let object = VaultRegistry::object_for(vault_id);
        let password = Zeroizing::new(password.to_vec());
        let opened = match shared.store.read(&object).await {
            Ok(bytes) => blocking(move || format::open(&bytes, &password)).await,
            Err(e) => Err(e),
        };

        match opened {
            Ok(opened) => {
                shared.limiter.record_success(vault_id, OperationClass::Unlock)?;
                shared.install(&mut inner, vault_id, opened);
                Ok(())
            }
            Err(e) => {
                shared.set_state(SessionState::Locked);
                if matches!(e, Error::WrongSecret) {
                    warn!(vault_id = %vault_id, "Unlock failed");
                    shared.limiter.record_failure(vault_id, OperationClass::Unlock)?;
                }
                shared.report("unlock", &e);
                Err(e)
            }
        }
    }

    /// Unlock using the platform-wrapped vault key.
    ///
    /// # Errors
    /// - `PlatformKeyUnavailable` if no bridge is configured or nothing is
    ///   enrolled for this vault
    /// - `AuthenticationCancelled` / `AuthenticationFailed` from the prompt
    /// - `WrongSecret` if the wrapped key no longer opens the container
    pub async fn unlock_with_platform(&self, vault_id: &VaultId) -> Result<()> {
        let shared = &self.shared;
        let bridge = shared.bridge.clone().ok_or(Error::PlatformKeyUnavailable)?;
        let mut inner = shared.inner.lock().await;
        shared.limiter.check(vault_id, OperationClass::Unlock)?;

        shared.close(&mut inner, true).await;
        shared.set_state(SessionState::Unlocking);

        let object = VaultRegistry::object_for(vault_id);
        let opened = async {
            let key = bridge.unwrap_key(vault_id).await?;
            let bytes = shared.store.read(&object).await?;
            blocking(move || format::open_with_key(&bytes, &key)).await
        }
        .await;

        match opened {
            Ok(opened) => {
                shared.limiter.record_success(vault_id, OperationClass::Unlock)?;
                shared.install(&mut inner, vault_id, opened);
                Ok(())
            }
            Err(e) => {
                shared.set_state(SessionState::Locked);
                if matches!(e, Error::WrongSecret) {
                    warn!(vault_id = %vault_id, "Platform key no longer opens vault");
                    shared.limiter.record_failure(vault_id, OperationClass::Unlock)?;
                }
                shared.report("unlock", &e);
                Err(e)
            }
        }
    }

    /// Lock the session. Pending edits are saved first. Idempotent.
    pub async fn lock(&self) {
        let mut inner = self.shared.inner.lock().await;
        self.shared.close(&mut inner, true).await;
    }

    /// Persist pending edits now.
    pub async fn force_save(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if inner.vault.is_none() {
            return Err(Error::Locked);
        }
        inner.pending_save = None;
        self.shared.flush(&mut inner).await?;
        self.shared.arm_auto_lock(&mut inner);
        Ok(())
    }

    /// Final save, then lock.
    pub async fn shutdown(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.pending_save = None;
        let saved = self.shared.flush(&mut inner).await;
        if let Err(e) = &saved {
            error!(error = %e, "Final save failed");
        }
        self.shared.close(&mut inner, false).await;
        saved
    }

    /// Irreversibly destroy a vault: its container, registry entry and any
    /// platform keys. The session is locked first.
    pub async fn nuke(&self, vault_id: &VaultId) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        let other_vault_open = inner
            .vault
            .as_ref()
            .is_some_and(|v| &v.vault_id != vault_id);
        shared.close(&mut inner, other_vault_open).await;

        let object = VaultRegistry::object_for(vault_id);
        match shared.store.delete(&object).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        shared.registry.unregister(vault_id).await?;
        if let Some(bridge) = &shared.bridge {
            if let Err(e) = bridge.revoke_all_keys(vault_id).await {
                warn!(vault_id = %vault_id, error = %e, "Could not revoke platform keys");
            }
        }

        warn!(vault_id = %vault_id, "Vault destroyed");
        shared.emit(SessionEvent::Nuked {
            vault_id: vault_id.clone(),
        });
        Ok(())
    }

    /// Convert the unlocked vault into a two-slot duress container.
    ///
    /// `master` must be the current password. The real vault is re-keyed
    /// under `master`; a decoy (generated if `populate_decoy`, otherwise
    /// empty) is keyed under `duress`. Platform keys are revoked and the
    /// session is locked afterwards.
    ///
    /// # Errors
    /// - `Locked`
    /// - `NotPermitted` when called from a decoy session
    /// - `InvalidInput` for empty or identical passwords
    /// - `WrongSecret` if `master` is not the current password
    /// - `MigrationFailure` if saving or writing fails; the vault on disk is
    ///   then unchanged and the session stays unlocked
    pub async fn enable_duress_mode(&self, master: &[u8], duress: &[u8], populate_decoy: bool) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;

        let active_slot = inner.vault.as_ref().ok_or(Error::Locked)?.active_slot;
        if active_slot == DECOY_SLOT {
            return Err(Error::NotPermitted(
                "Duress mode cannot be configured from this session".to_string(),
            ));
        }
        format::check_duress_passwords(master, duress)?;
        shared
            .verify_active(&inner, OperationClass::Unlock, master)
            .await?;

        inner.pending_save = None;
        shared
            .flush(&mut inner)
            .await
            .map_err(|e| Error::MigrationFailure(format!("save before migration failed: {}", e)))?;

        let vault = inner.vault.as_ref().ok_or(Error::Locked)?;
        let vault_id = vault.vault_id.clone();
        let object = vault.object.clone();
        let data = vault.data.clone();
        let master = Zeroizing::new(master.to_vec());
        let duress = Zeroizing::new(duress.to_vec());
        let params = shared.config.kdf_params.clone();
        let bucket = shared.config.payload_bucket;

        let file = blocking(move || {
            let mut data = data;
            let file = format::migrate_to_v3(&data, &master, &duress, populate_decoy, &params, bucket);
            data.zeroize();
            file
        })
        .await?;
        format::write_file(&shared.store, &object, &file)
            .await
            .map_err(|e| Error::MigrationFailure(format!("write failed: {}", e)))?;

        if let Some(bridge) = &shared.bridge {
            if let Err(e) = bridge.revoke_all_keys(&vault_id).await {
                warn!(vault_id = %vault_id, error = %e, "Could not revoke platform keys after migration");
            }
        }

        info!(vault_id = %vault_id, "Duress mode enabled");
        shared.close(&mut inner, false).await;
        Ok(())
    }

    /// Change the password of the active slot. The vault key, and with it
    /// any platform enrollment, is unchanged.
    pub async fn change_password(&self, current: &[u8], new_password: &[u8]) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        shared
            .verify_active(&inner, OperationClass::Unlock, current)
            .await?;

        inner.pending_save = None;
        shared.flush(&mut inner).await?;

        let vault = inner.vault.as_ref().ok_or(Error::Locked)?;
        let file = vault.file.clone();
        let slot = vault.active_slot;
        let key = vault.key.clone();
        let object = vault.object.clone();
        let new_password = Zeroizing::new(new_password.to_vec());

        let next = blocking(move || format::rewrap_slot(&file, slot, &key, &new_password)).await?;
        format::write_file(&shared.store, &object, &next).await?;

        if let Some(vault) = inner.vault.as_mut() {
            vault.file = next;
            info!(vault_id = %vault.vault_id, "Password changed");
        }
        shared.arm_auto_lock(&mut inner);
        Ok(())
    }

    /// Re-authenticate before a sensitive operation such as export.
    pub async fn verify_secret(&self, op: OperationClass, secret: &[u8]) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        shared.verify_active(&inner, op, secret).await?;
        shared.arm_auto_lock(&mut inner);
        Ok(())
    }

    fn bridge(&self) -> Result<Arc<KeyWrapBridge>> {
        self.shared
            .bridge
            .clone()
            .ok_or(Error::PlatformKeyUnavailable)
    }

    /// Enroll the unlocked vault for platform unlock.
    pub async fn enable_platform_unlock(&self, policy: KeyPolicy) -> Result<PlatformKeyMetadata> {
        let bridge = self.bridge()?;
        let mut inner = self.shared.inner.lock().await;
        let vault = inner.vault.as_ref().ok_or(Error::Locked)?;
        let vault_id = vault.vault_id.clone();
        let key = vault.key.clone();

        let metadata = bridge.wrap_key(&vault_id, &key, policy).await?;
        self.shared.arm_auto_lock(&mut inner);
        Ok(metadata)
    }

    /// Remove platform unlock for the unlocked vault.
    pub async fn disable_platform_unlock(&self) -> Result<()> {
        let bridge = self.bridge()?;
        let mut inner = self.shared.inner.lock().await;
        let vault_id = inner.vault.as_ref().ok_or(Error::Locked)?.vault_id.clone();

        bridge.revoke_all_keys(&vault_id).await?;
        self.shared.arm_auto_lock(&mut inner);
        Ok(())
    }

    /// Move the unlocked vault's platform wrap to a new key version.
    pub async fn rotate_platform_key(&self) -> Result<PlatformKeyMetadata> {
        let bridge = self.bridge()?;
        let mut inner = self.shared.inner.lock().await;
        let vault = inner.vault.as_ref().ok_or(Error::Locked)?;
        let vault_id = vault.vault_id.clone();
        let key = vault.key.clone();

        let metadata = bridge.rotate_key(&vault_id, &key).await?;
        self.shared.arm_auto_lock(&mut inner);
        Ok(metadata)
    }

    /// Enrollment metadata for a vault, if any.
    pub async fn platform_key_status(&self, vault_id: &VaultId) -> Result<Option<PlatformKeyMetadata>> {
        self.bridge()?.status(vault_id).await
    }

    /// Whether a vault's platform key is due for rotation.
    pub async fn platform_key_needs_rotation(&self, vault_id: &VaultId) -> Result<bool> {
        self.bridge()?.should_auto_rotate(vault_id).await
    }

    /// Current encrypted container bytes for backup or sync.
    ///
    /// Pending edits of that vault are flushed first.
    pub async fn encrypted_snapshot(&self, vault_id: &VaultId) -> Result<Vec<u8>> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner
            .vault
            .as_ref()
            .is_some_and(|v| &v.vault_id == vault_id)
        {
            inner.pending_save = None;
            shared.flush(&mut inner).await?;
        }
        let bytes = shared.store.read(&VaultRegistry::object_for(vault_id)).await?;
        if inner.vault.is_some() {
            shared.arm_auto_lock(&mut inner);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::REAL_SLOT;
    use crate::model::{EntryPayload, NewEntry};
    use sealvault_crypto::KdfParams;
    use sealvault_storage::MemoryStore;

    fn config() -> SessionConfig {
        SessionConfig {
            kdf_params: KdfParams {
                memory_cost: 64,
                time_cost: 1,
                parallelism: 1,
            },
            ..SessionConfig::default()
        }
    }

    fn manager() -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SessionManager::new(store.clone(), config()), store)
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (manager, _) = manager();
        let id = manager.create_vault("Personal", b"pw").await.unwrap();
        assert_eq!(manager.state(), SessionState::Locked);

        manager.unlock(&id, b"pw").await.unwrap();
        assert_eq!(manager.state(), SessionState::Unlocked);
        assert_eq!(manager.active_vault().await, Some(id.clone()));

        manager.lock().await;
        assert_eq!(manager.state(), SessionState::Locked);
        assert_eq!(manager.active_vault().await, None);

        manager.lock().await;
        assert_eq!(manager.state(), SessionState::Locked);
    }

    #[tokio::test]
    async fn test_failed_unlock_returns_to_locked() {
        let (manager, _) = manager();
        let id = manager.create_vault("Personal", b"pw").await.unwrap();
        let mut events = manager.subscribe();

        assert!(matches!(
            manager.unlock(&id, b"nope").await,
            Err(Error::WrongSecret)
        ));
        assert_eq!(manager.state(), SessionState::Locked);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_legacy_container_unlocks_and_saves() {
        let (manager, store) = manager();
        let id = VaultId::new("legacy").unwrap();
        let data = VaultData::new("Old");
        let (file, _) = format::create_legacy(&data, b"pw", &config().kdf_params).unwrap();
        let shared_store: Arc<dyn BlobStore> = store.clone();
        format::write_file(&shared_store, &VaultRegistry::object_for(&id), &file)
            .await
            .unwrap();

        manager.unlock(&id, b"pw").await.unwrap();
        {
            let inner = manager.shared.inner.lock().await;
            let vault = inner.vault.as_ref().unwrap();
            assert_eq!(vault.active_slot, REAL_SLOT);
            assert!(vault.file.is_legacy());
        }

        manager
            .add_entry(NewEntry::new("n", EntryPayload::Note { content: "c".into() }))
            .await
            .unwrap();
        manager.force_save().await.unwrap();
        manager.lock().await;

        manager.unlock(&id, b"pw").await.unwrap();
        assert_eq!(manager.list_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unlocking_other_vault_locks_first() {
        let (manager, _) = manager();
        let a = manager.create_vault("A", b"pa").await.unwrap();
        let b = manager.create_vault("B", b"pb").await.unwrap();

        manager.unlock(&a, b"pa").await.unwrap();
        manager
            .add_entry(NewEntry::new("n", EntryPayload::Note { content: "c".into() }))
            .await
            .unwrap();

        let mut events = manager.subscribe();
        manager.unlock(&b, b"pb").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Locked);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Unlocked { .. }
        ));
        assert_eq!(manager.active_vault().await, Some(b));

        // A's pending edit was flushed when it was locked.
        manager.unlock(&a, b"pa").await.unwrap();
        assert_eq!(manager.list_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_change_password() {
        let (manager, _) = manager();
        let id = manager.create_vault("Personal", b"old").await.unwrap();
        manager.unlock(&id, b"old").await.unwrap();

        assert!(matches!(
            manager.change_password(b"wrong", b"new").await,
            Err(Error::WrongSecret)
        ));
        manager.change_password(b"old", b"new").await.unwrap();
        manager.lock().await;

        assert!(matches!(
            manager.unlock(&id, b"old").await,
            Err(Error::WrongSecret)
        ));
        manager.unlock(&id, b"new").await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_secret_counts_per_class() {
        let (manager, _) = manager();
        let id = manager.create_vault("Personal", b"pw").await.unwrap();
        manager.unlock(&id, b"pw").await.unwrap();

        for _ in 0..5 {
            assert!(matches!(
                manager.verify_secret(OperationClass::Export, b"bad").await,
                Err(Error::WrongSecret)
            ));
        }
        assert!(matches!(
            manager.verify_secret(OperationClass::Export, b"pw").await,
            Err(Error::RateLimited { .. })
        ));
        manager
            .verify_secret(OperationClass::Import, b"pw")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_operations_require_unlock() {
        let (manager, _) = manager();
        assert!(matches!(manager.force_save().await, Err(Error::Locked)));
        assert!(matches!(manager.list_entries().await, Err(Error::Locked)));
        assert!(matches!(
            manager.enable_duress_mode(b"a", b"b", false).await,
            Err(Error::Locked)
        ));
    }

    #[tokio::test]
    async fn test_platform_unlock_requires_bridge() {
        let (manager, _) = manager();
        let id = manager.create_vault("Personal", b"pw").await.unwrap();
        assert!(matches!(
            manager.unlock_with_platform(&id).await,
            Err(Error::PlatformKeyUnavailable)
        ));
    }
}
