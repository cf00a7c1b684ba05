//! `ContentID`: `[prefix]? hexLower{2n}` (§6), where `n` is the hash output
//! length in bytes (32 here). The prefix partitions content by class and is
//! part of identity -- two payloads with the same bytes but different
//! prefixes are distinct contents.

use std::fmt;
use std::str::FromStr;

use pvault_api_types::{CoreError, ErrorKind};

pub const DIGEST_LEN: usize = 32;

/// Reserved prefixes that `WriteContent` refuses (§4.2): the compaction-log
/// prefix, and anything that would collide with well-known blob names.
pub const RESERVED_PREFIXES: &[u8] = b"mn";

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContentId {
    prefix: Option<u8>,
    digest: [u8; DIGEST_LEN],
}

impl ContentId {
    pub fn new(prefix: Option<u8>, digest: [u8; DIGEST_LEN]) -> Result<Self, CoreError> {
        if let Some(p) = prefix {
            if !p.is_ascii_lowercase() {
                return Err(CoreError::new(
                    ErrorKind::InvalidArgument,
                    "content prefix must be a lowercase ASCII letter",
                ));
            }
            if RESERVED_PREFIXES.contains(&p) {
                return Err(CoreError::new(
                    ErrorKind::InvalidArgument,
                    format!("prefix '{}' is reserved", p as char),
                ));
            }
        }
        Ok(Self { prefix, digest })
    }

    pub fn prefix(&self) -> Option<u8> {
        self.prefix
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// Fixed-width byte encoding used as the sort/lookup key inside index
    /// blobs: a leading prefix byte (0x00 meaning "no prefix", since 0x00
    /// never occurs in an ASCII prefix) followed by the digest.
    pub fn sort_key(&self) -> [u8; 1 + DIGEST_LEN] {
        let mut key = [0u8; 1 + DIGEST_LEN];
        key[0] = self.prefix.unwrap_or(0);
        key[1..].copy_from_slice(&self.digest);
        key
    }

    pub fn from_sort_key(key: &[u8; 1 + DIGEST_LEN]) -> Self {
        let prefix = if key[0] == 0 { None } else { Some(key[0]) };
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&key[1..]);
        Self { prefix, digest }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = self.prefix {
            write!(f, "{}", p as char)?;
        }
        write!(f, "{}", hex::encode(self.digest))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self)
    }
}

impl FromStr for ContentId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, CoreError> {
        let bytes = s.as_bytes();
        let (prefix, hex_part) = if bytes.len() == DIGEST_LEN * 2 {
            (None, s)
        } else if bytes.len() == DIGEST_LEN * 2 + 1 {
            (Some(bytes[0]), &s[1..])
        } else {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!("'{s}' has the wrong length for a ContentID"),
            ));
        };

        let decoded = hex::decode(hex_part)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "invalid hex in ContentID", e.into()))?;
        if decoded.len() != DIGEST_LEN {
            return Err(CoreError::new(ErrorKind::InvalidArgument, "digest must be 32 bytes"));
        }
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&decoded);
        ContentId::new(prefix, digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_then_parse_round_trips() {
        let id = ContentId::new(Some(b'a'), [0x11; 32]).unwrap();
        let rendered = id.to_string();
        let parsed: ContentId = rendered.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn no_prefix_round_trips() {
        let id = ContentId::new(None, [0x22; 32]).unwrap();
        let parsed: ContentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn reserved_prefix_is_rejected() {
        assert!(ContentId::new(Some(b'm'), [0u8; 32]).is_err());
        assert!(ContentId::new(Some(b'n'), [0u8; 32]).is_err());
    }

    #[test]
    fn differing_prefix_with_same_digest_is_a_distinct_id() {
        let a = ContentId::new(Some(b'a'), [1u8; 32]).unwrap();
        let b = ContentId::new(Some(b'b'), [1u8; 32]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sort_key_round_trips() {
        let id = ContentId::new(Some(b'q'), [3u8; 32]).unwrap();
        let key = id.sort_key();
        assert_eq!(ContentId::from_sort_key(&key), id);
    }

    #[test]
    fn ordering_is_prefix_major() {
        let a = ContentId::new(None, [0xff; 32]).unwrap();
        let b = ContentId::new(Some(b'a'), [0x00; 32]).unwrap();
        assert!(a < b);
    }
}
