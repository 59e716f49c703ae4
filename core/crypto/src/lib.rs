//! Cryptographic primitives for SealVault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Secure key management with automatic zeroization
//! - OS-backed random byte generation
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption failures are reported uniformly

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod random;

pub use aead::{decrypt, encrypt, open, seal, Sealed, NONCE_SIZE, TAG_SIZE};
pub use kdf::{derive_key, KdfParams};
pub use keys::{wipe_key, MasterKey, Salt, VaultKey, KEY_LENGTH, SALT_LENGTH};
pub use random::{fill_random, random_bytes};
