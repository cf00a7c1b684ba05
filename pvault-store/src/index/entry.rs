//! Bit-exact on-disk index blob format (§4.3):
//!
//! ```text
//! header:  MAGIC(8) | VERSION(1) | ENTRY_COUNT(4 LE) | STRIDE(2 LE)
//! entries: sorted array of fixed-stride rows, keyed by ContentID bytes
//! trailer: PACK_TABLE_COUNT(4 LE) | pack blob ids (length-prefixed strings)
//! ```
//!
//! Entries are fixed-stride and sorted by key, so a lookup is a binary
//! search in O(log n) and a prefix listing is a contiguous range scan. Pack
//! blob ids repeat across many entries (every content in the same pack
//! shares one), so they are kept out-of-line in the trailer and referenced
//! from each entry by a `u32` index, keeping the hot per-entry stride small.
//! That index is purely an on-disk encoding detail: `ContentInfo` in memory
//! always carries the resolved `pack_blob_id` string, so merging entries
//! from multiple index blobs (each with its own, differently-numbered
//! table) never confuses one blob's index for another's.

use std::collections::HashMap;

use pvault_api_types::{CoreError, ErrorKind};

use crate::content::content_id::{ContentId, DIGEST_LEN};
use crate::content::info::ContentInfo;

// sha256(b"pvault index blob v1")[0..8]
pub const INDEX_MAGIC: [u8; 8] = [0x5a, 0x31, 0xe8, 0x0c, 0x94, 0x72, 0xbb, 0x16];
pub const INDEX_FORMAT_VERSION: u8 = 1;

const KEY_LEN: usize = 1 + DIGEST_LEN;
// key(33) + pack_table_index(4) + offset(8) + packed_len(4) + original_len(4)
// + timestamp(8) + flags(1) + compression(1) + enc_key(1) + format_version(1)
pub const ENTRY_STRIDE: usize = KEY_LEN + 4 + 8 + 4 + 4 + 8 + 1 + 1 + 1 + 1;

const FLAG_DELETED: u8 = 0x01;

struct RawEntry {
    content_id: ContentId,
    pack_table_index: u32,
    offset_in_pack: u64,
    packed_length: u32,
    original_length: u32,
    timestamp_seconds: i64,
    deleted: bool,
    compression_header_id: u8,
    encryption_key_id: u8,
    format_version: u8,
}

fn write_entry(buf: &mut Vec<u8>, info: &ContentInfo, pack_table_index: u32) {
    buf.extend_from_slice(&info.content_id.sort_key());
    buf.extend_from_slice(&pack_table_index.to_le_bytes());
    buf.extend_from_slice(&info.offset_in_pack.to_le_bytes());
    buf.extend_from_slice(&info.packed_length.to_le_bytes());
    buf.extend_from_slice(&info.original_length.to_le_bytes());
    buf.extend_from_slice(&info.timestamp_seconds.to_le_bytes());
    let flags = if info.deleted { FLAG_DELETED } else { 0 };
    buf.push(flags);
    buf.push(info.compression_header_id);
    buf.push(info.encryption_key_id);
    buf.push(info.format_version);
}

fn read_raw_entry(bytes: &[u8]) -> RawEntry {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes[0..KEY_LEN]);
    let content_id = ContentId::from_sort_key(&key);
    let mut o = KEY_LEN;
    let pack_table_index = u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());
    o += 4;
    let offset_in_pack = u64::from_le_bytes(bytes[o..o + 8].try_into().unwrap());
    o += 8;
    let packed_length = u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());
    o += 4;
    let original_length = u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());
    o += 4;
    let timestamp_seconds = i64::from_le_bytes(bytes[o..o + 8].try_into().unwrap());
    o += 8;
    let flags = bytes[o];
    o += 1;
    let compression_header_id = bytes[o];
    o += 1;
    let encryption_key_id = bytes[o];
    o += 1;
    let format_version = bytes[o];

    RawEntry {
        content_id,
        pack_table_index,
        offset_in_pack,
        packed_length,
        original_length,
        timestamp_seconds,
        deleted: flags & FLAG_DELETED != 0,
        compression_header_id,
        encryption_key_id,
        format_version,
    }
}

/// One fully-parsed index blob: entries (with pack ids already resolved)
/// plus the distinct pack-id table they were encoded against.
#[derive(Clone, Debug, Default)]
pub struct IndexBlobContents {
    pub entries: Vec<ContentInfo>,
    pub pack_table: Vec<String>,
}

impl IndexBlobContents {
    /// Serialize to the bit-exact on-disk format. `entries` must already be
    /// sorted by `ContentId` (the merge/build path is responsible for that).
    /// The trailer table is rebuilt from the distinct `pack_blob_id`s
    /// actually referenced; `self.pack_table` is not consulted.
    pub fn encode(&self) -> Vec<u8> {
        let mut table: Vec<String> = self.entries.iter().map(|e| e.pack_blob_id.clone()).collect();
        table.sort();
        table.dedup();
        let index_of: HashMap<&str, u32> = table
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i as u32))
            .collect();

        let mut buf = Vec::with_capacity(15 + self.entries.len() * ENTRY_STRIDE + 64);
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.push(INDEX_FORMAT_VERSION);
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(ENTRY_STRIDE as u16).to_le_bytes());

        for entry in &self.entries {
            write_entry(&mut buf, entry, index_of[entry.pack_blob_id.as_str()]);
        }

        buf.extend_from_slice(&(table.len() as u32).to_le_bytes());
        for pack_id in &table {
            let bytes = pack_id.as_bytes();
            buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(bytes);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, CoreError> {
        if data.len() < 15 {
            return Err(CoreError::new(ErrorKind::Corrupted, "index blob shorter than header"));
        }
        if data[0..8] != INDEX_MAGIC {
            return Err(CoreError::new(ErrorKind::Corrupted, "index blob magic mismatch"));
        }
        let version = data[8];
        if version != INDEX_FORMAT_VERSION {
            return Err(CoreError::new(
                ErrorKind::UnknownAlgorithm,
                format!("unsupported index format version {version}"),
            ));
        }
        let count = u32::from_le_bytes(data[9..13].try_into().unwrap()) as usize;
        let stride = u16::from_le_bytes(data[13..15].try_into().unwrap()) as usize;
        if stride != ENTRY_STRIDE {
            return Err(CoreError::new(
                ErrorKind::Corrupted,
                format!("unexpected index entry stride {stride}"),
            ));
        }

        let entries_start = 15;
        let entries_end = entries_start + count * stride;
        if data.len() < entries_end + 4 {
            return Err(CoreError::new(ErrorKind::Corrupted, "index blob truncated"));
        }

        let mut raw_entries = Vec::with_capacity(count);
        for i in 0..count {
            let start = entries_start + i * stride;
            raw_entries.push(read_raw_entry(&data[start..start + stride]));
        }

        let mut pos = entries_end;
        let table_count = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let mut pack_table = Vec::with_capacity(table_count);
        for _ in 0..table_count {
            if data.len() < pos + 2 {
                return Err(CoreError::new(ErrorKind::Corrupted, "index blob trailer truncated"));
            }
            let len = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            if data.len() < pos + len {
                return Err(CoreError::new(ErrorKind::Corrupted, "index blob trailer truncated"));
            }
            let s = std::str::from_utf8(&data[pos..pos + len])
                .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "pack id not utf8", e.into()))?
                .to_string();
            pack_table.push(s);
            pos += len;
        }

        let mut entries = Vec::with_capacity(raw_entries.len());
        for raw in raw_entries {
            let pack_blob_id = pack_table
                .get(raw.pack_table_index as usize)
                .ok_or_else(|| CoreError::new(ErrorKind::Corrupted, "pack table index out of range"))?
                .clone();
            entries.push(ContentInfo {
                content_id: raw.content_id,
                pack_blob_id,
                offset_in_pack: raw.offset_in_pack,
                packed_length: raw.packed_length,
                original_length: raw.original_length,
                timestamp_seconds: raw.timestamp_seconds,
                compression_header_id: raw.compression_header_id,
                encryption_key_id: raw.encryption_key_id,
                format_version: raw.format_version,
                deleted: raw.deleted,
            });
        }

        Ok(Self { entries, pack_table })
    }

    /// Binary search by ContentID. Requires `entries` to be sorted.
    pub fn lookup(&self, id: &ContentId) -> Option<&ContentInfo> {
        self.entries
            .binary_search_by_key(&id.sort_key(), |e| e.content_id.sort_key())
            .ok()
            .map(|i| &self.entries[i])
    }
}
