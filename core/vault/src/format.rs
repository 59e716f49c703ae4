//! Vault container codec.
//!
//! A container holds one or two key slots and the same number of encrypted
//! payloads:
//!
//! - **v1** (legacy): one slot, payload is the encrypted JSON of
//!   [`VaultData`].
//! - **v3**: exactly two slots. Payload plaintext is framed as
//!   `u32-le length || JSON || chaff` and padded up to a power-of-two size
//!   class of at least 64 KiB, so slot payloads do not reveal how much data
//!   each holds. A slot that was never given a password carries random bytes
//!   of the same shape.
//!
//! Each slot stores `salt`, `iv`, `kdf_params` and `wrapped_key`. The slot
//! password derives a key-encryption key via Argon2id, which unwraps the
//! slot's vault key, which decrypts the slot's payload.
//!
//! # Security
//! - Opening always runs the KDF for every slot, so timing does not reveal
//!   which slot matched.
//! - Every failure while opening collapses to [`Error::WrongSecret`].
//! - Saving rewrites only the active slot's payload; the other slot's bytes
//!   are carried over untouched. The active payload never shrinks below the
//!   other slot's, so the two stay equal until one vault outgrows the shared
//!   size class. From then on the larger class is visible until the other
//!   slot is next saved.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::duress::{generate_chaff, generate_decoy_vault};
use crate::model::VaultData;
use sealvault_common::{Error, Result};
use sealvault_crypto::{
    decrypt, derive_key, encrypt, open as open_sealed, seal, KdfParams, Salt, Sealed, VaultKey,
    KEY_LENGTH, NONCE_SIZE, SALT_LENGTH, TAG_SIZE,
};
use sealvault_storage::BlobStore;

pub const FORMAT_V1: u32 = 1;
pub const FORMAT_V3: u32 = 3;

/// Slot holding the real vault.
pub const REAL_SLOT: usize = 0;
/// Slot holding the decoy vault in a duress container.
pub const DECOY_SLOT: usize = 1;

/// Associated data binding wrapped keys to their purpose.
const SLOT_AAD: &[u8] = b"sealvault.slot.v1";

/// Length prefix of a framed v3 payload.
const FRAME_HEADER: usize = 4;

/// Smallest v3 plaintext frame.
const MIN_FRAME: usize = 64 * 1024;

fn to_b64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn from_b64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

mod b64_list {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.iter().map(|b| STANDARD.encode(b)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// One password-protected wrapping of a vault key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSlot {
    #[serde(serialize_with = "to_b64", deserialize_with = "from_b64")]
    pub salt: Vec<u8>,
    #[serde(serialize_with = "to_b64", deserialize_with = "from_b64")]
    pub iv: Vec<u8>,
    pub kdf_params: KdfParams,
    /// `ciphertext || tag` of the vault key.
    #[serde(serialize_with = "to_b64", deserialize_with = "from_b64")]
    pub wrapped_key: Vec<u8>,
}

/// Serialized vault container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFile {
    pub format_version: u32,
    pub slots: Vec<VaultSlot>,
    #[serde(with = "b64_list")]
    pub payloads: Vec<Vec<u8>>,
}

impl VaultFile {
    /// Parse and structurally validate a container.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        let expected = match file.format_version {
            FORMAT_V1 => 1,
            FORMAT_V3 => 2,
            other => {
                return Err(Error::Serialization(format!(
                    "Unsupported vault format: {}",
                    other
                )))
            }
        };
        if file.slots.len() != expected || file.payloads.len() != expected {
            return Err(Error::Serialization(format!(
                "Format {} requires {} slot(s)",
                file.format_version, expected
            )));
        }
        Ok(file)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Whether this is a single-slot v1 container.
    pub fn is_legacy(&self) -> bool {
        self.format_version == FORMAT_V1
    }
}

/// Result of a successful open.
pub struct OpenedVault {
    pub data: VaultData,
    pub key: VaultKey,
    pub active_slot: usize,
    pub file: VaultFile,
}

impl std::fmt::Debug for OpenedVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedVault")
            .field("active_slot", &self.active_slot)
            .field("format_version", &self.file.format_version)
            .finish_non_exhaustive()
    }
}

/// Plaintext frame length for `json_len` bytes of JSON: the power-of-two
/// size class holding it, never below [`MIN_FRAME`], rounded up to `bucket`.
fn padded_len(json_len: usize, bucket: usize) -> usize {
    let raw = FRAME_HEADER + json_len;
    let class = raw.next_power_of_two().max(MIN_FRAME);
    let bucket = bucket.max(1);
    class.div_ceil(bucket) * bucket
}

fn serialize_data(data: &VaultData) -> Result<Zeroizing<Vec<u8>>> {
    serde_json::to_vec(data)
        .map(Zeroizing::new)
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Frame, pad to at least `min_frame`, and encrypt a v3 payload.
fn seal_v3(json: &[u8], key: &VaultKey, bucket: usize, min_frame: usize) -> Result<Vec<u8>> {
    let len = u32::try_from(json.len())
        .map_err(|_| Error::InvalidInput("Vault too large".to_string()))?;
    let frame_len = padded_len(json.len(), bucket).max(min_frame);

    let mut frame = Zeroizing::new(Vec::with_capacity(frame_len));
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(json);
    frame.extend_from_slice(&generate_chaff(frame_len - FRAME_HEADER - json.len()));
    encrypt(key.as_bytes(), &frame)
}

fn open_payload(version: u32, payload: &[u8], key: &VaultKey) -> Result<VaultData> {
    let plain = Zeroizing::new(decrypt(key.as_bytes(), payload)?);
    let json = match version {
        FORMAT_V1 => &plain[..],
        _ => {
            if plain.len() < FRAME_HEADER {
                return Err(Error::Serialization("Truncated payload frame".to_string()));
            }
            let mut header = [0u8; FRAME_HEADER];
            header.copy_from_slice(&plain[..FRAME_HEADER]);
            let len = u32::from_le_bytes(header) as usize;
            plain
                .get(FRAME_HEADER..FRAME_HEADER + len)
                .ok_or_else(|| Error::Serialization("Payload length out of range".to_string()))?
        }
    };
    serde_json::from_slice(json).map_err(|e| Error::Serialization(e.to_string()))
}

fn build_slot(password: &[u8], key: &VaultKey, params: &KdfParams) -> Result<VaultSlot> {
    let salt = Salt::generate();
    let kek = derive_key(password, &salt, params)?;
    let sealed = seal(kek.as_bytes(), key.as_bytes(), SLOT_AAD)?;
    Ok(VaultSlot {
        salt: salt.as_bytes().to_vec(),
        iv: sealed.nonce.to_vec(),
        kdf_params: params.clone(),
        wrapped_key: sealed.ciphertext_and_tag(),
    })
}

/// Slot that no password opens, shaped like a real one.
fn chaff_slot(params: &KdfParams) -> VaultSlot {
    VaultSlot {
        salt: generate_chaff(SALT_LENGTH),
        iv: generate_chaff(NONCE_SIZE),
        kdf_params: params.clone(),
        wrapped_key: generate_chaff(KEY_LENGTH + TAG_SIZE),
    }
}

fn unwrap_slot(slot: &VaultSlot, password: &[u8]) -> Result<VaultKey> {
    let salt = Salt::from_slice(&slot.salt)?;
    let kek = derive_key(password, &salt, &slot.kdf_params)?;
    let sealed = Sealed::from_parts(&slot.iv, &slot.wrapped_key)?;
    let raw = Zeroizing::new(open_sealed(kek.as_bytes(), &sealed, SLOT_AAD)?);
    VaultKey::from_slice(&raw)
}

/// Create a new v3 container around `data` in the real slot.
///
/// The decoy slot is filled with chaff of the same length and the same KDF
/// parameters.
pub fn create(data: &VaultData, password: &[u8], params: &KdfParams, bucket: usize) -> Result<(VaultFile, VaultKey)> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    let key = VaultKey::generate();
    let slot = build_slot(password, &key, params)?;
    let json = serialize_data(data)?;
    let payload = seal_v3(&json, &key, bucket, 0)?;
    let chaff = generate_chaff(payload.len());

    let file = VaultFile {
        format_version: FORMAT_V3,
        slots: vec![slot, chaff_slot(params)],
        payloads: vec![payload, chaff],
    };
    Ok((file, key))
}

/// Open a container with a password.
///
/// Every slot's KDF runs regardless of earlier results; the first slot
/// whose key and payload both authenticate wins. Malformed containers and
/// all decryption failures report [`Error::WrongSecret`].
pub fn open(bytes: &[u8], password: &[u8]) -> Result<OpenedVault> {
    let file = VaultFile::from_bytes(bytes).map_err(|e| {
        debug!("Rejecting vault container: {}", e);
        Error::WrongSecret
    })?;

    let mut found: Option<(usize, VaultKey, VaultData)> = None;
    for (index, slot) in file.slots.iter().enumerate() {
        let attempt = unwrap_slot(slot, password).and_then(|key| {
            let data = open_payload(file.format_version, &file.payloads[index], &key)?;
            Ok((key, data))
        });
        match attempt {
            Ok((key, data)) if found.is_none() => found = Some((index, key, data)),
            _ => {}
        }
    }

    let (active_slot, key, data) = found.ok_or(Error::WrongSecret)?;
    Ok(OpenedVault {
        data,
        key,
        active_slot,
        file,
    })
}

/// Open a container with an already-unwrapped vault key.
pub fn open_with_key(bytes: &[u8], key: &VaultKey) -> Result<OpenedVault> {
    let file = VaultFile::from_bytes(bytes).map_err(|_| Error::WrongSecret)?;

    let mut found = None;
    for (index, payload) in file.payloads.iter().enumerate() {
        let attempt = open_payload(file.format_version, payload, key);
        match attempt {
            Ok(data) if found.is_none() => found = Some((index, data)),
            _ => {}
        }
    }

    let (active_slot, data) = found.ok_or(Error::WrongSecret)?;
    Ok(OpenedVault {
        data,
        key: key.clone(),
        active_slot,
        file,
    })
}

/// Re-encrypt `data` into the active slot's payload with a fresh nonce.
///
/// The other slot is copied verbatim. For v3 the new payload is padded to
/// its size class and never shorter than the other slot's payload.
pub fn save(file: &VaultFile, data: &VaultData, key: &VaultKey, active_slot: usize, bucket: usize) -> Result<VaultFile> {
    if active_slot >= file.slots.len() {
        return Err(Error::InvalidInput(format!("No slot {}", active_slot)));
    }
    let json = serialize_data(data)?;
    let payload = match file.format_version {
        FORMAT_V1 => encrypt(key.as_bytes(), &json)?,
        _ => {
            let peer_frame = file
                .payloads
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != active_slot)
                .map(|(_, p)| p.len().saturating_sub(NONCE_SIZE + TAG_SIZE))
                .max()
                .unwrap_or(0);
            seal_v3(&json, key, bucket, peer_frame)?
        }
    };

    let mut next = file.clone();
    next.payloads[active_slot] = payload;
    Ok(next)
}

/// Replace one slot's password. The vault key and payloads are unchanged.
///
/// The slot keeps its KDF parameters so both slots stay alike.
pub fn rewrap_slot(file: &VaultFile, slot: usize, key: &VaultKey, new_password: &[u8]) -> Result<VaultFile> {
    if new_password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    let current = file
        .slots
        .get(slot)
        .ok_or_else(|| Error::InvalidInput(format!("No slot {}", slot)))?;
    let replacement = build_slot(new_password, key, &current.kdf_params)?;
    let mut next = file.clone();
    next.slots[slot] = replacement;
    Ok(next)
}

/// Check `password` against one slot without decrypting the payload.
pub fn verify_slot(file: &VaultFile, slot: usize, password: &[u8]) -> Result<()> {
    let slot = file.slots.get(slot).ok_or(Error::WrongSecret)?;
    unwrap_slot(slot, password).map(|_| ()).map_err(|_| Error::WrongSecret)
}

/// Both passwords must be non-empty and different.
pub fn check_duress_passwords(master: &[u8], duress: &[u8]) -> Result<()> {
    if master.is_empty() || duress.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    if bool::from(master.ct_eq(duress)) {
        return Err(Error::InvalidInput(
            "Duress password must differ from the master password".to_string(),
        ));
    }
    Ok(())
}

/// Build a two-slot container with the real vault under `master` and a
/// decoy under `duress`.
///
/// Both slots get fresh keys and salts. The decoy is generated when
/// `populate_decoy` is set and is otherwise empty. Payloads are padded to
/// the same length.
pub fn migrate_to_v3(
    real: &VaultData,
    master: &[u8],
    duress: &[u8],
    populate_decoy: bool,
    params: &KdfParams,
    bucket: usize,
) -> Result<VaultFile> {
    check_duress_passwords(master, duress)?;

    let decoy = if populate_decoy {
        generate_decoy_vault(&real.metadata.name)
    } else {
        let mut empty = VaultData::new(real.metadata.name.clone());
        empty.metadata.created_at = real.metadata.created_at;
        empty
    };

    let build = || -> Result<VaultFile> {
        let real_key = VaultKey::generate();
        let decoy_key = VaultKey::generate();
        let real_json = serialize_data(real)?;
        let decoy_json = serialize_data(&decoy)?;
        let frame = padded_len(real_json.len(), bucket).max(padded_len(decoy_json.len(), bucket));

        Ok(VaultFile {
            format_version: FORMAT_V3,
            slots: vec![
                build_slot(master, &real_key, params)?,
                build_slot(duress, &decoy_key, params)?,
            ],
            payloads: vec![
                seal_v3(&real_json, &real_key, bucket, frame)?,
                seal_v3(&decoy_json, &decoy_key, bucket, frame)?,
            ],
        })
    };

    build().map_err(|e| Error::MigrationFailure(e.to_string()))
}

/// Serialize and atomically write a container.
pub async fn write_file(store: &Arc<dyn BlobStore>, object: &str, file: &VaultFile) -> Result<()> {
    let bytes = file.to_bytes()?;
    store.write_atomic(object, &bytes).await
}

/// Single-slot v1 container, as written by older releases.
#[cfg(test)]
pub(crate) fn create_legacy(data: &VaultData, password: &[u8], params: &KdfParams) -> Result<(VaultFile, VaultKey)> {
    let key = VaultKey::generate();
    let slot = build_slot(password, &key, params)?;
    let json = serialize_data(data)?;
    let payload = encrypt(key.as_bytes(), &json)?;
    Ok((
        VaultFile {
            format_version: FORMAT_V1,
            slots: vec![slot],
            payloads: vec![payload],
        },
        key,
    ))
}
