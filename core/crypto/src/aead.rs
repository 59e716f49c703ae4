//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Every call to
//! [`encrypt`] or [`seal`] draws a fresh nonce from the OS CSPRNG.
//!
//! Every decryption failure (wrong key, flipped bit, truncation) is reported
//! as the same [`Error::Authentication`] so callers cannot build an oracle
//! on top of the error kind.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, AeadInPlace, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use sealvault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Detached AEAD output: the nonce, ciphertext and tag kept apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl Sealed {
    /// Build from a stored iv and `ciphertext || tag` blob.
    pub fn from_parts(nonce: &[u8], ciphertext_and_tag: &[u8]) -> Result<Self> {
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| Error::Authentication)?;
        if ciphertext_and_tag.len() < TAG_SIZE {
            return Err(Error::Authentication);
        }
        let (ciphertext, tag) = ciphertext_and_tag.split_at(ciphertext_and_tag.len() - TAG_SIZE);
        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag);
        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
            tag: tag_bytes,
        })
    }

    /// `ciphertext || tag`, the layout stored in a vault slot.
    pub fn ciphertext_and_tag(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + TAG_SIZE);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }
}

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
///
/// # Errors
/// - Returns error if key length is incorrect
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt `nonce || ciphertext || tag` produced by [`encrypt`].
///
/// # Errors
/// - [`Error::Crypto`] if the key length is wrong
/// - [`Error::Authentication`] for anything wrong with the ciphertext
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Authentication);
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|_| Error::Authentication)
}

/// Encrypt with associated data, returning nonce and tag separately.
pub fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, aad, &mut buffer)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);
    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(Sealed {
        nonce: nonce_bytes,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt a [`Sealed`] value, verifying the tag over ciphertext and `aad`.
pub fn open(key: &[u8], sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&sealed.nonce),
            aad,
            &mut buffer,
            GenericArray::from_slice(&sealed.tag),
        )
        .map_err(|_| Error::Authentication)?;
    Ok(buffer)
}
