use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::Error;
use serde::{Deserialize, Serialize};

/// 32-byte fingerprint of a local encryption key, usually computed with SHA-256.
///
/// Distinct from a `ContentID`: this identifies a *key*, not a content
/// payload, and is only ever compared for equality (to catch a key file
/// that decrypts to the wrong key material).
#[derive(Debug, Eq, PartialEq, Hash, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Fingerprint {
    #[serde(with = "hex_bytes")]
    bytes: [u8; 32],
}

impl Fingerprint {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

/// Renders as the first 8 bytes, colon-separated hex, matching the short
/// key-id convention used for console output.
impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.bytes[0..8];
        for (i, b) in short.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut cleaned = s.to_string();
        cleaned.retain(|c| c != ':');
        let decoded = hex::decode(&cleaned)?;
        if decoded.len() != 32 {
            anyhow::bail!("fingerprint must decode to 32 bytes, got {}", decoded.len());
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Fingerprint::new(bytes))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let decoded = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if decoded.len() != 32 {
            return Err(serde::de::Error::custom("expected 32 bytes"));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_round_trip() {
        let fp = Fingerprint::new([0x11; 32]);
        let rendered = fp.to_string();
        assert_eq!(rendered, "11:11:11:11:11:11:11:11");
    }

    #[test]
    fn from_str_rejects_wrong_length() {
        assert!(Fingerprint::from_str("aabb").is_err());
    }

    #[test]
    fn json_round_trip() {
        let fp = Fingerprint::new([7u8; 32]);
        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }
}
