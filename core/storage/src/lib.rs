//! Blob storage for SealVault containers.
//!
//! This module provides a small trait-based interface over the places a
//! vault container can live, plus the plaintext vault registry.
//!
//! # Design Principles
//! - Atomic replacement: every write is write-temp-then-rename
//! - Flat namespace: object names are single validated file names
//! - Ciphertext only: nothing secret is stored outside encrypted payloads

pub mod local;
pub mod memory;
pub mod registry;
pub mod store;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use registry::{RegistryEntry, VaultRegistry, REGISTRY_OBJECT};
pub use store::{validate_name, BlobStore};
