//! The open-pack state machine (§4.2):
//!
//! ```text
//! Empty --append--> Building --size>=threshold--> Sealed --upload ok--> Indexed
//!                      |                              |
//!                      +----------flush---------------+
//! ```
//!
//! `Indexed` is terminal for that pack instance; a fresh `PackBuilder` is
//! opened in its place. One builder is single-writer, guarded by the
//! content manager's mutex; sealing and uploading happen outside that lock.

use pvault_api_types::CoreError;

use crate::codec;
use crate::content::content_id::ContentId;
use crate::content::info::ContentInfo;

/// Which of the two content classes (§3) a pack holds. Data packs (`p`)
/// hold ordinary content; metadata packs (`q`) hold small, frequently-
/// accessed special-prefixed content (manifests, indexes' own source
/// material) so a quick maintenance cycle can rewrite them independently
/// of the much larger data packs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PackClass {
    Data,
    Metadata,
}

impl PackClass {
    pub fn blob_prefix(self) -> char {
        match self {
            PackClass::Data => 'p',
            PackClass::Metadata => 'q',
        }
    }
}

/// Classify a content prefix into a pack class. Manifests and other
/// special-prefixed system content (§4.5, §4.6) route to metadata packs;
/// everything else (including un-prefixed object-manager chunks) is data.
pub fn pack_class_for_prefix(prefix: Option<u8>) -> PackClass {
    match prefix {
        Some(b'x') | Some(b'g') => PackClass::Metadata,
        _ => PackClass::Data,
    }
}

pub(crate) struct PendingEntry {
    pub content_id: ContentId,
    pub offset: u64,
    pub packed_length: u32,
    pub original_length: u32,
    pub timestamp_seconds: i64,
    pub compression_header_id: u8,
    pub encryption_key_id: u8,
    pub format_version: u8,
}

/// A pack still being assembled in memory (`Building`), or freshly `Sealed`
/// and awaiting upload.
pub struct PackBuilder {
    pub(crate) blob_id: String,
    class: PackClass,
    buffer: Vec<u8>,
    entries: Vec<PendingEntry>,
    max_size: u64,
}

fn random_pack_suffix() -> String {
    let mut bytes = [0u8; 16];
    openssl::rand::rand_bytes(&mut bytes).expect("system RNG must be available");
    hex::encode(bytes)
}

impl PackBuilder {
    pub fn new(class: PackClass, max_size: u64) -> Self {
        let blob_id = format!("{}{}", class.blob_prefix(), random_pack_suffix());
        Self {
            blob_id,
            class,
            buffer: Vec::new(),
            entries: Vec::new(),
            max_size,
        }
    }

    pub fn class(&self) -> PackClass {
        self.class
    }

    pub fn blob_id(&self) -> &str {
        &self.blob_id
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn current_size(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Whether appending `additional_bytes` more would overflow `max_size`.
    pub fn would_overflow(&self, additional_bytes: u64) -> bool {
        !self.buffer.is_empty() && self.current_size() + additional_bytes > self.max_size
    }

    /// Append an already-framed (encoded) payload to the pack buffer,
    /// recording a pending index entry. Returns the offset it was written at.
    pub fn append(
        &mut self,
        content_id: ContentId,
        framed: &[u8],
        original_length: u32,
        timestamp_seconds: i64,
        compression_header_id: u8,
        encryption_key_id: u8,
    ) -> u64 {
        let offset = self.buffer.len() as u64;
        self.buffer.extend_from_slice(framed);
        self.entries.push(PendingEntry {
            content_id,
            offset,
            packed_length: framed.len() as u32,
            original_length,
            timestamp_seconds,
            compression_header_id,
            encryption_key_id,
            format_version: 1,
        });
        offset
    }

    /// Serve a read from the in-memory buffer while the pack is still open.
    pub fn read_range(&self, range: std::ops::Range<u64>) -> Option<&[u8]> {
        self.buffer.get(range.start as usize..range.end as usize)
    }

    /// Consume the builder, returning the raw bytes to upload and the
    /// entries to publish as pending index rows once the upload succeeds.
    pub fn seal(self) -> (String, Vec<u8>, Vec<PendingEntry>) {
        (self.blob_id, self.buffer, self.entries)
    }
}

/// Turn a sealed pack's pending entries into `ContentInfo` rows.
pub(crate) fn entries_to_infos(entries: &[PendingEntry], pack_blob_id: &str) -> Vec<ContentInfo> {
    entries
        .iter()
        .map(|e| ContentInfo {
            content_id: e.content_id,
            pack_blob_id: pack_blob_id.to_string(),
            offset_in_pack: e.offset,
            packed_length: e.packed_length,
            original_length: e.original_length,
            timestamp_seconds: e.timestamp_seconds,
            compression_header_id: e.compression_header_id,
            encryption_key_id: e.encryption_key_id,
            format_version: e.format_version,
            deleted: false,
        })
        .collect()
}

/// Encode and append one content payload to a pack builder in one step.
pub fn encode_and_append(
    builder: &mut PackBuilder,
    content_id: ContentId,
    payload: &[u8],
    key: Option<&pvault_tools::crypt::CryptConfig>,
    compress: bool,
    timestamp_seconds: i64,
) -> Result<u64, CoreError> {
    let unique_id = {
        let mut u = [0u8; 16];
        u[0] = content_id.prefix().unwrap_or(0);
        u
    };
    let framed = codec::encode(payload, key, &unique_id, compress)?;
    let compression_header_id = if compress { 1 } else { 0 };
    let encryption_key_id = if key.is_some() { 1 } else { 0 };
    Ok(builder.append(
        content_id,
        &framed,
        payload.len() as u32,
        timestamp_seconds,
        compression_header_id,
        encryption_key_id,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_class_routes_by_prefix() {
        assert_eq!(pack_class_for_prefix(None), PackClass::Data);
        assert_eq!(pack_class_for_prefix(Some(b'x')), PackClass::Metadata);
    }

    #[test]
    fn would_overflow_is_false_for_first_entry_regardless_of_size() {
        let builder = PackBuilder::new(PackClass::Data, 100);
        assert!(!builder.would_overflow(1_000));
    }

    #[test]
    fn would_overflow_triggers_once_non_empty() {
        let mut builder = PackBuilder::new(PackClass::Data, 10);
        let id = ContentId::new(None, [1u8; 32]).unwrap();
        builder.append(id, b"12345", 5, 0, 0, 0);
        assert!(builder.would_overflow(10));
        assert!(!builder.would_overflow(3));
    }

    #[test]
    fn blob_id_carries_class_prefix() {
        assert!(PackBuilder::new(PackClass::Data, 10).blob_id().starts_with('p'));
        assert!(PackBuilder::new(PackClass::Metadata, 10).blob_id().starts_with('q'));
    }
}
