//! Decrypted vault contents: entries, folders and tags.
//!
//! Everything here lives only in memory between unlock and lock. All
//! mutations go through [`VaultData`] so referential rules (folder and tag
//! references, folder tree shape, timestamps) are enforced in one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use zeroize::Zeroize;

use sealvault_common::{Error, Result};

/// Version of the decrypted payload schema.
pub const SCHEMA_VERSION: u32 = 1;

/// Kind of secret an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Login,
    Note,
    Card,
    Identity,
    Ssh,
    Preset,
}

/// Type-specific entry content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryPayload {
    Login {
        username: String,
        password: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        totp_secret: Option<String>,
    },
    Note {
        content: String,
    },
    Card {
        holder: String,
        number: String,
        expiry: String,
        cvv: String,
    },
    Identity {
        full_name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
    Ssh {
        public_key: String,
        private_key: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Saved password-generator settings.
    Preset {
        length: u32,
        lowercase: bool,
        uppercase: bool,
        digits: bool,
        symbols: bool,
    },
}

impl EntryPayload {
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryPayload::Login { .. } => EntryType::Login,
            EntryPayload::Note { .. } => EntryType::Note,
            EntryPayload::Card { .. } => EntryType::Card,
            EntryPayload::Identity { .. } => EntryType::Identity,
            EntryPayload::Ssh { .. } => EntryType::Ssh,
            EntryPayload::Preset { .. } => EntryType::Preset,
        }
    }
}

impl Zeroize for EntryPayload {
    fn zeroize(&mut self) {
        match self {
            EntryPayload::Login {
                username,
                password,
                url,
                totp_secret,
            } => {
                username.zeroize();
                password.zeroize();
                url.zeroize();
                totp_secret.zeroize();
            }
            EntryPayload::Note { content } => content.zeroize(),
            EntryPayload::Card {
                holder,
                number,
                expiry,
                cvv,
            } => {
                holder.zeroize();
                number.zeroize();
                expiry.zeroize();
                cvv.zeroize();
            }
            EntryPayload::Identity {
                full_name,
                email,
                phone,
                address,
            } => {
                full_name.zeroize();
                email.zeroize();
                phone.zeroize();
                address.zeroize();
            }
            EntryPayload::Ssh {
                public_key,
                private_key,
                passphrase,
            } => {
                public_key.zeroize();
                private_key.zeroize();
                passphrase.zeroize();
            }
            EntryPayload::Preset { length, .. } => length.zeroize(),
        }
    }
}

/// One stored secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EntryPayload,
}

impl VaultEntry {
    pub fn entry_type(&self) -> EntryType {
        self.payload.entry_type()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFolder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultTag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub schema_version: u32,
}

/// Input for [`VaultData::add_entry`].
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub title: String,
    pub folder_id: Option<String>,
    pub tag_ids: Vec<String>,
    pub favorite: bool,
    pub payload: EntryPayload,
}

impl NewEntry {
    pub fn new(title: impl Into<String>, payload: EntryPayload) -> Self {
        Self {
            title: title.into(),
            folder_id: None,
            tag_ids: Vec::new(),
            favorite: false,
            payload,
        }
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn with_tags(mut self, tag_ids: Vec<String>) -> Self {
        self.tag_ids = tag_ids;
        self
    }

    pub fn favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }
}

/// Partial update of an entry. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    /// `Some(None)` moves the entry to the root.
    pub folder_id: Option<Option<String>>,
    pub tag_ids: Option<Vec<String>>,
    pub favorite: Option<bool>,
    /// Must keep the entry's type.
    pub payload: Option<EntryPayload>,
}

/// Partial update of a folder.
#[derive(Debug, Clone, Default)]
pub struct FolderUpdate {
    pub name: Option<String>,
    /// `Some(None)` moves the folder to the root.
    pub parent_id: Option<Option<String>>,
    pub order: Option<i64>,
}

/// What happens to the contents of a deleted folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderDeletion {
    /// Delete the folder's subtree and every entry in it.
    Cascade,
    /// Move direct entries and child folders to the root.
    ReassignToRoot,
}

/// Summary of a folder deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderRemoval {
    pub folders_removed: usize,
    pub entries_removed: usize,
    pub entries_moved: usize,
}

/// Decrypted vault structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultData {
    pub metadata: VaultMetadata,
    #[serde(default)]
    pub folders: Vec<VaultFolder>,
    #[serde(default)]
    pub entries: Vec<VaultEntry>,
    #[serde(default)]
    pub tags: Vec<VaultTag>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn require_name(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} cannot be empty", what)));
    }
    Ok(())
}

impl VaultData {
    /// Empty vault.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            metadata: VaultMetadata {
                name: name.into(),
                created_at: now,
                modified_at: now,
                schema_version: SCHEMA_VERSION,
            },
            folders: Vec::new(),
            entries: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Record a mutation of the vault as a whole.
    pub fn touch(&mut self) {
        self.metadata.modified_at = Utc::now();
    }

    pub fn entry(&self, id: &str) -> Option<&VaultEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn folder(&self, id: &str) -> Option<&VaultFolder> {
        self.folders.iter().find(|f| f.id == id)
    }

    pub fn tag(&self, id: &str) -> Option<&VaultTag> {
        self.tags.iter().find(|t| t.id == id)
    }

    /// Entries directly inside `folder_id` (`None` = root).
    pub fn entries_in(&self, folder_id: Option<&str>) -> Vec<&VaultEntry> {
        self.entries
            .iter()
            .filter(|e| e.folder_id.as_deref() == folder_id)
            .collect()
    }

    fn check_folder_ref(&self, folder_id: Option<&str>) -> Result<()> {
        match folder_id {
            Some(id) if self.folder(id).is_none() => {
                Err(Error::NotFound(format!("Folder not found: {}", id)))
            }
            _ => Ok(()),
        }
    }

    fn check_tag_refs(&self, tag_ids: &[String]) -> Result<()> {
        for id in tag_ids {
            if self.tag(id).is_none() {
                return Err(Error::NotFound(format!("Tag not found: {}", id)));
            }
        }
        Ok(())
    }

    fn dedup_tags(tag_ids: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        tag_ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
    }

    pub fn add_entry(&mut self, new: NewEntry) -> Result<VaultEntry> {
        require_name(&new.title, "Entry title")?;
        self.check_folder_ref(new.folder_id.as_deref())?;
        self.check_tag_refs(&new.tag_ids)?;

        let now = Utc::now();
        let entry = VaultEntry {
            id: new_id(),
            title: new.title,
            folder_id: new.folder_id,
            tag_ids: Self::dedup_tags(new.tag_ids),
            favorite: new.favorite,
            created_at: now,
            modified_at: now,
            payload: new.payload,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn update_entry(&mut self, id: &str, update: EntryUpdate) -> Result<VaultEntry> {
        let current = self
            .entry(id)
            .ok_or_else(|| Error::NotFound(format!("Entry not found: {}", id)))?;

        if let Some(title) = &update.title {
            require_name(title, "Entry title")?;
        }
        if let Some(folder_id) = &update.folder_id {
            self.check_folder_ref(folder_id.as_deref())?;
        }
        if let Some(tag_ids) = &update.tag_ids {
            self.check_tag_refs(tag_ids)?;
        }
        if let Some(payload) = &update.payload {
            if payload.entry_type() != current.entry_type() {
                return Err(Error::InvalidInput(
                    "Entry type cannot be changed".to_string(),
                ));
            }
        }

        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("Entry not found: {}", id)))?;

        if let Some(title) = update.title {
            entry.title = title;
        }
        if let Some(folder_id) = update.folder_id {
            entry.folder_id = folder_id;
        }
        if let Some(tag_ids) = update.tag_ids {
            entry.tag_ids = Self::dedup_tags(tag_ids);
        }
        if let Some(favorite) = update.favorite {
            entry.favorite = favorite;
        }
        if let Some(payload) = update.payload {
            let mut old = std::mem::replace(&mut entry.payload, payload);
            old.zeroize();
        }
        entry.modified_at = Utc::now();
        Ok(entry.clone())
    }

    pub fn delete_entry(&mut self, id: &str) -> Result<()> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("Entry not found: {}", id)))?;
        let mut removed = self.entries.remove(index);
        removed.title.zeroize();
        removed.payload.zeroize();
        Ok(())
    }

    pub fn add_folder(&mut self, name: impl Into<String>, parent_id: Option<String>) -> Result<VaultFolder> {
        let name = name.into();
        require_name(&name, "Folder name")?;
        self.check_folder_ref(parent_id.as_deref())?;

        let order = self
            .folders
            .iter()
            .filter(|f| f.parent_id == parent_id)
            .map(|f| f.order)
            .max()
            .map_or(0, |max| max + 1);

        let now = Utc::now();
        let folder = VaultFolder {
            id: new_id(),
            name,
            parent_id,
            order,
            created_at: now,
            modified_at: now,
        };
        self.folders.push(folder.clone());
        Ok(folder)
    }

    /// Whether `candidate` is `folder_id` or one of its descendants.
    fn is_within(&self, candidate: &str, folder_id: &str) -> bool {
        let mut cursor = Some(candidate.to_string());
        let mut hops = 0;
        while let Some(id) = cursor {
            if id == folder_id {
                return true;
            }
            hops += 1;
            if hops > self.folders.len() {
                return false;
            }
            cursor = self.folder(&id).and_then(|f| f.parent_id.clone());
        }
        false
    }

    pub fn update_folder(&mut self, id: &str, update: FolderUpdate) -> Result<VaultFolder> {
        if self.folder(id).is_none() {
            return Err(Error::NotFound(format!("Folder not found: {}", id)));
        }
        if let Some(name) = &update.name {
            require_name(name, "Folder name")?;
        }
        if let Some(Some(parent)) = &update.parent_id {
            self.check_folder_ref(Some(parent))?;
            if self.is_within(parent, id) {
                return Err(Error::InvalidInput(
                    "Folder cannot be moved into itself".to_string(),
                ));
            }
        }

        let folder = self
            .folders
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::NotFound(format!("Folder not found: {}", id)))?;
        if let Some(name) = update.name {
            folder.name = name;
        }
        if let Some(parent_id) = update.parent_id {
            folder.parent_id = parent_id;
        }
        if let Some(order) = update.order {
            folder.order = order;
        }
        folder.modified_at = Utc::now();
        Ok(folder.clone())
    }

    pub fn delete_folder(&mut self, id: &str, mode: FolderDeletion) -> Result<FolderRemoval> {
        if self.folder(id).is_none() {
            return Err(Error::NotFound(format!("Folder not found: {}", id)));
        }
        let now = Utc::now();
        let mut removal = FolderRemoval::default();

        match mode {
            FolderDeletion::Cascade => {
                let doomed: HashSet<String> = self
                    .folders
                    .iter()
                    .filter(|f| self.is_within(&f.id, id))
                    .map(|f| f.id.clone())
                    .collect();

                let before = self.entries.len();
                self.entries.retain_mut(|e| {
                    let inside = e
                        .folder_id
                        .as_ref()
                        .is_some_and(|folder| doomed.contains(folder));
                    if inside {
                        e.payload.zeroize();
                    }
                    !inside
                });
                removal.entries_removed = before - self.entries.len();

                let before = self.folders.len();
                self.folders.retain(|f| !doomed.contains(&f.id));
                removal.folders_removed = before - self.folders.len();
            }
            FolderDeletion::ReassignToRoot => {
                for entry in self
                    .entries
                    .iter_mut()
                    .filter(|e| e.folder_id.as_deref() == Some(id))
                {
                    entry.folder_id = None;
                    entry.modified_at = now;
                    removal.entries_moved += 1;
                }
                for child in self
                    .folders
                    .iter_mut()
                    .filter(|f| f.parent_id.as_deref() == Some(id))
                {
                    child.parent_id = None;
                    child.modified_at = now;
                }
                self.folders.retain(|f| f.id != id);
                removal.folders_removed = 1;
            }
        }
        Ok(removal)
    }

    pub fn add_tag(&mut self, name: impl Into<String>, color: Option<String>) -> Result<VaultTag> {
        let name = name.into();
        require_name(&name, "Tag name")?;
        if self.tags.iter().any(|t| t.name.eq_ignore_ascii_case(&name)) {
            return Err(Error::AlreadyExists(format!("Tag already exists: {}", name)));
        }
        let now = Utc::now();
        let tag = VaultTag {
            id: new_id(),
            name,
            color,
            created_at: now,
            modified_at: now,
        };
        self.tags.push(tag.clone());
        Ok(tag)
    }

    pub fn update_tag(&mut self, id: &str, name: Option<String>, color: Option<Option<String>>) -> Result<VaultTag> {
        if let Some(name) = &name {
            require_name(name, "Tag name")?;
            if self
                .tags
                .iter()
                .any(|t| t.id != id && t.name.eq_ignore_ascii_case(name))
            {
                return Err(Error::AlreadyExists(format!("Tag already exists: {}", name)));
            }
        }
        let tag = self
            .tags
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("Tag not found: {}", id)))?;
        if let Some(name) = name {
            tag.name = name;
        }
        if let Some(color) = color {
            tag.color = color;
        }
        tag.modified_at = Utc::now();
        Ok(tag.clone())
    }

    /// Delete a tag and strip it from every entry.
    pub fn delete_tag(&mut self, id: &str) -> Result<()> {
        let index = self
            .tags
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("Tag not found: {}", id)))?;
        self.tags.remove(index);

        let now = Utc::now();
        for entry in self.entries.iter_mut() {
            let before = entry.tag_ids.len();
            entry.tag_ids.retain(|t| t != id);
            if entry.tag_ids.len() != before {
                entry.modified_at = now;
            }
        }
        Ok(())
    }
}

impl Zeroize for VaultData {
    fn zeroize(&mut self) {
        self.metadata.name.zeroize();
        for entry in self.entries.iter_mut() {
            entry.title.zeroize();
            entry.payload.zeroize();
        }
        for folder in self.folders.iter_mut() {
            folder.name.zeroize();
        }
        for tag in self.tags.iter_mut() {
            tag.name.zeroize();
        }
        self.entries.clear();
        self.folders.clear();
        self.tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(user: &str) -> EntryPayload {
        EntryPayload::Login {
            username: user.to_string(),
            password: "xyz".to_string(),
            url: None,
            totp_secret: None,
        }
    }

    #[test]
    fn test_entry_serializes_with_type_field() {
        let mut data = VaultData::new("Personal");
        data.add_entry(NewEntry::new("Example", login("a@b.com"))).unwrap();

        let json = serde_json::to_value(&data.entries[0]).unwrap();
        assert_eq!(json["type"], "login");
        assert_eq!(json["username"], "a@b.com");

        let back: VaultEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, data.entries[0]);
    }

    #[test]
    fn test_add_entry_rejects_unknown_folder_and_tag() {
        let mut data = VaultData::new("v");
        let err = data
            .add_entry(NewEntry::new("x", login("u")).in_folder("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = data
            .add_entry(NewEntry::new("x", login("u")).with_tags(vec!["nope".into()]))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(data.entries.is_empty());
    }

    #[test]
    fn test_update_preserves_created_at() {
        let mut data = VaultData::new("v");
        let entry = data.add_entry(NewEntry::new("Mail", login("u"))).unwrap();

        let updated = data
            .update_entry(
                &entry.id,
                EntryUpdate {
                    title: Some("Mail (work)".into()),
                    favorite: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.created_at, entry.created_at);
        assert!(updated.modified_at >= entry.modified_at);
        assert_eq!(updated.title, "Mail (work)");
        assert!(updated.favorite);
    }

    #[test]
    fn test_update_cannot_change_type() {
        let mut data = VaultData::new("v");
        let entry = data.add_entry(NewEntry::new("Mail", login("u"))).unwrap();
        let err = data
            .update_entry(
                &entry.id,
                EntryUpdate {
                    payload: Some(EntryPayload::Note {
                        content: "n".into(),
                    }),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_delete_folder_reassign_to_root() {
        let mut data = VaultData::new("v");
        let parent = data.add_folder("Work", None).unwrap();
        let child = data.add_folder("Servers", Some(parent.id.clone())).unwrap();
        let entry = data
            .add_entry(NewEntry::new("VPN", login("u")).in_folder(parent.id.clone()))
            .unwrap();

        let removal = data
            .delete_folder(&parent.id, FolderDeletion::ReassignToRoot)
            .unwrap();

        assert_eq!(removal.entries_moved, 1);
        assert_eq!(data.entry(&entry.id).unwrap().folder_id, None);
        assert_eq!(data.folder(&child.id).unwrap().parent_id, None);
        assert!(data.folder(&parent.id).is_none());
    }

    #[test]
    fn test_delete_folder_cascade_removes_subtree() {
        let mut data = VaultData::new("v");
        let parent = data.add_folder("Work", None).unwrap();
        let child = data.add_folder("Servers", Some(parent.id.clone())).unwrap();
        let other = data.add_folder("Home", None).unwrap();
        data.add_entry(NewEntry::new("a", login("u")).in_folder(parent.id.clone()))
            .unwrap();
        data.add_entry(NewEntry::new("b", login("u")).in_folder(child.id.clone()))
            .unwrap();
        let kept = data
            .add_entry(NewEntry::new("c", login("u")).in_folder(other.id.clone()))
            .unwrap();

        let removal = data.delete_folder(&parent.id, FolderDeletion::Cascade).unwrap();

        assert_eq!(removal.folders_removed, 2);
        assert_eq!(removal.entries_removed, 2);
        assert_eq!(data.entries.len(), 1);
        assert_eq!(data.entries[0].id, kept.id);
    }

    #[test]
    fn test_folder_cannot_move_into_descendant() {
        let mut data = VaultData::new("v");
        let a = data.add_folder("A", None).unwrap();
        let b = data.add_folder("B", Some(a.id.clone())).unwrap();

        let err = data
            .update_folder(
                &a.id,
                FolderUpdate {
                    parent_id: Some(Some(b.id.clone())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_folder_order_increments_per_parent() {
        let mut data = VaultData::new("v");
        let a = data.add_folder("A", None).unwrap();
        let b = data.add_folder("B", None).unwrap();
        let inner = data.add_folder("C", Some(a.id.clone())).unwrap();
        assert_eq!(a.order, 0);
        assert_eq!(b.order, 1);
        assert_eq!(inner.order, 0);
    }

    #[test]
    fn test_delete_tag_strips_references() {
        let mut data = VaultData::new("v");
        let tag = data.add_tag("2fa", None).unwrap();
        let entry = data
            .add_entry(NewEntry::new("x", login("u")).with_tags(vec![tag.id.clone(), tag.id.clone()]))
            .unwrap();
        assert_eq!(entry.tag_ids.len(), 1);

        data.delete_tag(&tag.id).unwrap();
        assert!(data.entry(&entry.id).unwrap().tag_ids.is_empty());
    }

    #[test]
    fn test_duplicate_tag_names_rejected() {
        let mut data = VaultData::new("v");
        data.add_tag("Work", None).unwrap();
        assert!(matches!(
            data.add_tag("work", None),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_zeroize_clears_everything() {
        let mut data = VaultData::new("Personal");
        data.add_entry(NewEntry::new("x", login("u"))).unwrap();
        data.add_folder("f", None).unwrap();
        data.add_tag("t", None).unwrap();

        data.zeroize();
        assert!(data.entries.is_empty());
        assert!(data.folders.is_empty());
        assert!(data.tags.is_empty());
        assert!(data.metadata.name.is_empty());
    }
}
