use serde::{Deserialize, Serialize};

/// Key derivation function used to protect a locally-stored encryption key
/// with an operator passphrase. Password-based KDF *algorithms* themselves
/// are out of scope for this crate family; this enum only records which
/// external implementation produced a given key record so it can be
/// rehydrated later.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Kdf {
    None,
    Scrypt,
    #[serde(rename = "pbkdf2")]
    PBKDF2,
}

impl Default for Kdf {
    fn default() -> Self {
        Kdf::Scrypt
    }
}

/// Non-secret metadata about a local key record, suitable for display.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KeyInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub kdf: Kdf,
    pub created: i64,
    pub modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Kdf::Scrypt).unwrap(), "\"scrypt\"");
        assert_eq!(serde_json::to_string(&Kdf::PBKDF2).unwrap(), "\"pbkdf2\"");
    }
}
