//! Entry, folder and tag operations on the unlocked vault.
//!
//! Mutations apply to the in-memory structure immediately, mark it dirty,
//! restart the save debounce and emit [`SessionEvent::Changed`]. Every call,
//! read or write, restarts the auto-lock timer.

use crate::events::SessionEvent;
use crate::model::{
    EntryUpdate, FolderDeletion, FolderRemoval, FolderUpdate, NewEntry, VaultData, VaultEntry,
    VaultFolder, VaultMetadata, VaultTag,
};
use crate::session::SessionManager;
use sealvault_common::{Error, Result};

impl SessionManager {
    async fn read<T>(&self, f: impl FnOnce(&VaultData) -> T) -> Result<T> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        let vault = inner.vault.as_ref().ok_or(Error::Locked)?;
        let out = f(&vault.data);
        shared.arm_auto_lock(&mut inner);
        Ok(out)
    }

    async fn mutate<T>(&self, f: impl FnOnce(&mut VaultData) -> Result<T>) -> Result<T> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        let vault = inner.vault.as_mut().ok_or(Error::Locked)?;

        let result = f(&mut vault.data);
        let changed = match &result {
            Ok(_) => {
                vault.data.touch();
                vault.dirty = true;
                Some(vault.vault_id.clone())
            }
            Err(_) => None,
        };

        if let Some(vault_id) = changed {
            shared.schedule_save(&mut inner);
            shared.emit(SessionEvent::Changed { vault_id });
        }
        shared.arm_auto_lock(&mut inner);
        result
    }

    pub async fn metadata(&self) -> Result<VaultMetadata> {
        self.read(|data| data.metadata.clone()).await
    }

    pub async fn rename_vault(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.mutate(move |data| {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput("Vault name cannot be empty".to_string()));
            }
            data.metadata.name = name;
            Ok(())
        })
        .await
    }

    pub async fn list_entries(&self) -> Result<Vec<VaultEntry>> {
        self.read(|data| data.entries.clone()).await
    }

    pub async fn get_entry(&self, id: &str) -> Result<VaultEntry> {
        self.read(|data| data.entry(id).cloned())
            .await?
            .ok_or_else(|| Error::NotFound(format!("Entry not found: {}", id)))
    }

    /// Entries whose title, username or URL contains `query`, ignoring case.
    pub async fn search_entries(&self, query: &str) -> Result<Vec<VaultEntry>> {
        let needle = query.to_lowercase();
        self.read(|data| {
            data.entries
                .iter()
                .filter(|entry| {
                    if entry.title.to_lowercase().contains(&needle) {
                        return true;
                    }
                    match &entry.payload {
                        crate::model::EntryPayload::Login { username, url, .. } => {
                            username.to_lowercase().contains(&needle)
                                || url
                                    .as_deref()
                                    .is_some_and(|u| u.to_lowercase().contains(&needle))
                        }
                        _ => false,
                    }
                })
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn add_entry(&self, entry: NewEntry) -> Result<VaultEntry> {
        self.mutate(|data| data.add_entry(entry)).await
    }

    pub async fn update_entry(&self, id: &str, update: EntryUpdate) -> Result<VaultEntry> {
        self.mutate(|data| data.update_entry(id, update)).await
    }

    pub async fn delete_entry(&self, id: &str) -> Result<()> {
        self.mutate(|data| data.delete_entry(id)).await
    }

    pub async fn list_folders(&self) -> Result<Vec<VaultFolder>> {
        self.read(|data| data.folders.clone()).await
    }

    pub async fn add_folder(&self, name: &str, parent_id: Option<String>) -> Result<VaultFolder> {
        self.mutate(|data| data.add_folder(name, parent_id)).await
    }

    pub async fn update_folder(&self, id: &str, update: FolderUpdate) -> Result<VaultFolder> {
        self.mutate(|data| data.update_folder(id, update)).await
    }

    /// Delete a folder. `mode` decides what happens to its contents.
    pub async fn delete_folder(&self, id: &str, mode: FolderDeletion) -> Result<FolderRemoval> {
        self.mutate(|data| data.delete_folder(id, mode)).await
    }

    pub async fn list_tags(&self) -> Result<Vec<VaultTag>> {
        self.read(|data| data.tags.clone()).await
    }

    pub async fn add_tag(&self, name: &str, color: Option<String>) -> Result<VaultTag> {
        self.mutate(|data| data.add_tag(name, color)).await
    }

    pub async fn update_tag(
        &self,
        id: &str,
        name: Option<String>,
        color: Option<Option<String>>,
    ) -> Result<VaultTag> {
        self.mutate(|data| data.update_tag(id, name, color)).await
    }

    pub async fn delete_tag(&self, id: &str) -> Result<()> {
        self.mutate(|data| data.delete_tag(id)).await
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SessionConfig;
    use crate::events::SessionEvent;
    use crate::model::{EntryPayload, EntryUpdate, FolderDeletion, NewEntry};
    use crate::session::SessionManager;
    use sealvault_common::{Error, VaultId};
    use sealvault_crypto::KdfParams;
    use sealvault_storage::MemoryStore;
    use std::sync::Arc;

    async fn unlocked() -> (SessionManager, VaultId) {
        let config = SessionConfig {
            kdf_params: KdfParams {
                memory_cost: 64,
                time_cost: 1,
                parallelism: 1,
            },
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(Arc::new(MemoryStore::new()), config);
        let id = manager.create_vault("Personal", b"pw").await.unwrap();
        manager.unlock(&id, b"pw").await.unwrap();
        (manager, id)
    }

    fn login(title: &str, user: &str) -> NewEntry {
        NewEntry::new(
            title,
            EntryPayload::Login {
                username: user.to_string(),
                password: "secret".to_string(),
                url: Some(format!("https://{}.example.com", title.to_lowercase())),
                totp_secret: None,
            },
        )
    }

    #[tokio::test]
    async fn test_crud_emits_changed() {
        let (manager, id) = unlocked().await;
        let mut events = manager.subscribe();

        let entry = manager.add_entry(login("Mail", "me")).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Changed {
                vault_id: id.clone()
            }
        );

        manager
            .update_entry(
                &entry.id,
                EntryUpdate {
                    favorite: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(manager.get_entry(&entry.id).await.unwrap().favorite);

        manager.delete_entry(&entry.id).await.unwrap();
        assert!(matches!(
            manager.get_entry(&entry.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_vault_clean() {
        let (manager, _) = unlocked().await;
        let err = manager
            .add_entry(login("Mail", "me").in_folder("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let inner = manager.shared.inner.lock().await;
        assert!(!inner.vault.as_ref().unwrap().dirty);
    }

    #[tokio::test]
    async fn test_folders_and_tags() {
        let (manager, _) = unlocked().await;
        let folder = manager.add_folder("Work", None).await.unwrap();
        let tag = manager.add_tag("2fa", Some("#ff0000".into())).await.unwrap();
        let entry = manager
            .add_entry(
                login("VPN", "me")
                    .in_folder(folder.id.clone())
                    .with_tags(vec![tag.id.clone()]),
            )
            .await
            .unwrap();

        manager.delete_tag(&tag.id).await.unwrap();
        assert!(manager.get_entry(&entry.id).await.unwrap().tag_ids.is_empty());

        manager
            .delete_folder(&folder.id, FolderDeletion::ReassignToRoot)
            .await
            .unwrap();
        assert_eq!(manager.get_entry(&entry.id).await.unwrap().folder_id, None);
        assert!(manager.list_folders().await.unwrap().is_empty());
        assert!(manager.list_tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_and_rename() {
        let (manager, _) = unlocked().await;
        manager.add_entry(login("GitHub", "octo")).await.unwrap();
        manager.add_entry(login("Bank", "me")).await.unwrap();

        assert_eq!(manager.search_entries("git").await.unwrap().len(), 1);
        assert_eq!(manager.search_entries("OCTO").await.unwrap().len(), 1);
        assert_eq!(manager.search_entries("example.com").await.unwrap().len(), 2);

        manager.rename_vault("Family").await.unwrap();
        assert_eq!(manager.metadata().await.unwrap().name, "Family");
        assert!(manager.rename_vault(" ").await.is_err());
    }
}
