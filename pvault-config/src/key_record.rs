//! Local, encrypted-at-rest record of repository-unlock material.
//!
//! Password-based KDF *algorithms* are out of scope (§1 Out of scope); this
//! module only stores which external KDF produced a key record and the
//! already-encrypted key bytes, so a record can be rehydrated by whatever
//! KDF implementation the deployment links in.

use serde::{Deserialize, Serialize};

use pvault_api_types::{Fingerprint, Kdf, KeyInfo};

/// Parameters of whichever KDF produced this record's encryption key.
/// The salt is the only thing this crate needs to persist; derivation
/// itself is delegated to an external KDF implementation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum KeyDerivation {
    None,
    Scrypt { salt: Vec<u8> },
    PBKDF2 { salt: Vec<u8> },
}

impl KeyDerivation {
    pub fn kind(&self) -> Kdf {
        match self {
            KeyDerivation::None => Kdf::None,
            KeyDerivation::Scrypt { .. } => Kdf::Scrypt,
            KeyDerivation::PBKDF2 { .. } => Kdf::PBKDF2,
        }
    }
}

/// A locally-stored, possibly passphrase-protected repository key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KeyRecord {
    pub kdf: KeyDerivation,
    pub created: i64,
    pub modified: i64,
    /// The key bytes: plaintext 32-byte key if `kdf` is `None`, otherwise
    /// AEAD-sealed key bytes that a KDF-derived passphrase key unlocks.
    pub data: Vec<u8>,
    pub fingerprint: Option<Fingerprint>,
    pub hint: Option<String>,
}

impl KeyRecord {
    pub fn plaintext(raw_key: [u8; 32], created: i64) -> Self {
        Self {
            kdf: KeyDerivation::None,
            created,
            modified: created,
            data: raw_key.to_vec(),
            fingerprint: None,
            hint: None,
        }
    }

    pub fn is_protected(&self) -> bool {
        !matches!(self.kdf, KeyDerivation::None)
    }
}

impl From<&KeyRecord> for KeyInfo {
    fn from(record: &KeyRecord) -> Self {
        Self {
            path: None,
            kdf: record.kdf.kind(),
            created: record.created,
            modified: record.modified,
            fingerprint: record.fingerprint.as_ref().map(|fp| fp.to_string()),
            hint: record.hint.clone(),
        }
    }
}
