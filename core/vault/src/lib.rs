//! Vault engine for SealVault.
//!
//! This module provides:
//! - The decrypted data model (entries, folders, tags)
//! - The on-disk container codec with duress (two-slot) support
//! - Decoy vault generation
//! - Unlock rate limiting
//! - Session lifecycle with auto-lock and debounced saves
//!
//! # Architecture
//! The vault crate sits between the host application and the storage and
//! key-wrap layers. Decrypted data exists only inside an unlocked
//! [`SessionManager`]; everything that leaves it is ciphertext.

pub mod config;
pub mod duress;
pub mod events;
pub mod format;
pub mod model;
pub mod operations;
pub mod rate_limit;
pub mod session;
mod timer;

pub use config::{RateLimitConfig, SessionConfig};
pub use duress::{generate_chaff, generate_decoy_vault, generate_password};
pub use events::{EventBus, SessionEvent};
pub use format::{OpenedVault, VaultFile, VaultSlot, DECOY_SLOT, FORMAT_V1, FORMAT_V3, REAL_SLOT};
pub use model::{
    EntryPayload, EntryType, EntryUpdate, FolderDeletion, FolderRemoval, FolderUpdate, NewEntry,
    VaultData, VaultEntry, VaultFolder, VaultMetadata, VaultTag,
};
pub use rate_limit::{OperationClass, RateLimiter};
pub use session::{SessionManager, SessionState};
