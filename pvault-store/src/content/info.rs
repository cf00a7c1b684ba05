//! `Info`: content metadata as stored in an index entry.
//!
//! §9 Design Notes: the ancestor models this as an interface with multiple
//! concrete implementations (a compact struct, and a deletion wrapper). In
//! a systems language that indirection buys nothing; `deleted` and
//! `deleted_timestamp_seconds` are plain fields on one concrete struct, and
//! the merge rule (`index::merge`) reads them directly.

use crate::content::content_id::ContentId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentInfo {
    pub content_id: ContentId,
    pub pack_blob_id: String,
    pub offset_in_pack: u64,
    pub packed_length: u32,
    pub original_length: u32,
    pub timestamp_seconds: i64,
    pub compression_header_id: u8,
    pub encryption_key_id: u8,
    pub format_version: u8,
    pub deleted: bool,
}

impl ContentInfo {
    pub fn pack_range(&self) -> std::ops::Range<u64> {
        self.offset_in_pack..self.offset_in_pack + self.packed_length as u64
    }
}
