//! The merge rule (§4.3): idempotent, commutative, associative, so replaying
//! index blobs in any order or any number of times converges to the same
//! result. This is what makes concurrent writers and compaction safe.

use crate::content::content_id::ContentId;
use crate::content::info::ContentInfo;

/// Combine two observations of the same `ContentID` into the one that wins.
///
/// Greater `timestamp_seconds` wins; ties prefer `deleted=false`; remaining
/// ties prefer the lexicographically greater `(pack_blob_id, offset)` -- an
/// arbitrary but deterministic tie-break so every replica converges.
pub fn merge_one(a: ContentInfo, b: ContentInfo) -> ContentInfo {
    debug_assert_eq!(a.content_id, b.content_id);

    if a.timestamp_seconds != b.timestamp_seconds {
        return if a.timestamp_seconds > b.timestamp_seconds { a } else { b };
    }
    if a.deleted != b.deleted {
        return if !a.deleted { a } else { b };
    }
    let a_key = (&a.pack_blob_id, a.offset_in_pack);
    let b_key = (&b.pack_blob_id, b.offset_in_pack);
    if a_key >= b_key {
        a
    } else {
        b
    }
}

/// Fold a stream of entries (in any order, possibly with duplicate
/// `ContentID`s) down to one winner per id.
pub fn merge_all(entries: impl IntoIterator<Item = ContentInfo>) -> Vec<ContentInfo> {
    use std::collections::HashMap;
    let mut merged: HashMap<ContentId, ContentInfo> = HashMap::new();
    for entry in entries {
        let content_id = entry.content_id;
        merged
            .entry(content_id)
            .and_modify(|cur| *cur = merge_one(cur.clone(), entry.clone()))
            .or_insert(entry);
    }
    let mut out: Vec<ContentInfo> = merged.into_values().collect();
    out.sort_by_key(|e| e.content_id.sort_key());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: ContentId, timestamp: i64, deleted: bool, pack: &str, offset: u64) -> ContentInfo {
        ContentInfo {
            content_id: id,
            pack_blob_id: pack.to_string(),
            offset_in_pack: offset,
            packed_length: 1,
            original_length: 1,
            timestamp_seconds: timestamp,
            compression_header_id: 0,
            encryption_key_id: 0,
            format_version: 1,
            deleted,
        }
    }

    #[test]
    fn greater_timestamp_wins() {
        let id = ContentId::new(None, [1u8; 32]).unwrap();
        let older = info(id, 100, false, "p0", 0);
        let newer = info(id, 200, true, "p0", 0);
        assert_eq!(merge_one(older.clone(), newer.clone()).timestamp_seconds, 200);
        assert_eq!(merge_one(newer, older).timestamp_seconds, 200);
    }

    #[test]
    fn tie_prefers_not_deleted() {
        let id = ContentId::new(None, [2u8; 32]).unwrap();
        let alive = info(id, 100, false, "p0", 0);
        let dead = info(id, 100, true, "p0", 0);
        assert!(!merge_one(alive.clone(), dead.clone()).deleted);
        assert!(!merge_one(dead, alive).deleted);
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let id = ContentId::new(None, [3u8; 32]).unwrap();
        let a = info(id, 50, false, "p1", 10);
        let b = info(id, 50, false, "p2", 5);
        assert_eq!(merge_one(a.clone(), b.clone()), merge_one(b, a.clone()));
        assert_eq!(merge_one(a.clone(), a.clone()), a);
    }

    #[test]
    fn merge_all_collapses_duplicates_across_many_entries() {
        let id = ContentId::new(None, [4u8; 32]).unwrap();
        let other = ContentId::new(None, [5u8; 32]).unwrap();
        let entries = vec![
            info(id, 10, false, "p0", 0),
            info(id, 30, false, "p0", 0),
            info(id, 20, true, "p0", 0),
            info(other, 1, false, "p0", 0),
        ];
        let merged = merge_all(entries);
        assert_eq!(merged.len(), 2);
        let winner = merged.iter().find(|e| e.content_id == id).unwrap();
        assert_eq!(winner.timestamp_seconds, 30);
    }
}
