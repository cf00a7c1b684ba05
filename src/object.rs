//! Object Manager (§4.4): turns arbitrary byte streams into trees of
//! contents, and serves reads back out of an `ObjectID`.
//!
//! A write chunks the input on rolling-hash boundaries and writes each
//! chunk through the content manager. A single chunk becomes a *direct*
//! `ObjectID` (just that chunk's `ContentID`). More than one chunk is
//! serialized as a list and written as a content in its own right, with
//! the parent reference marked *indirect* -- recursively, so the list
//! itself fans out into another level once it outgrows one chunk. Typical
//! chunk sizes keep this at two or three levels deep.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use pvault_api_types::{CoreError, ErrorKind};
use pvault_config::ChunkerParams;
use pvault_store::{BlobStore, Chunker, ContentId, ContentManager};

/// A reference to stored data: either a single content directly, or an
/// indirect pointer to a (possibly further indirect) list of contents.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ObjectId {
    content_id: ContentId,
    indirect: bool,
}

impl ObjectId {
    pub fn direct(content_id: ContentId) -> Self {
        Self { content_id, indirect: false }
    }

    pub fn indirect(content_id: ContentId) -> Self {
        Self { content_id, indirect: true }
    }

    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    pub fn is_indirect(&self) -> bool {
        self.indirect
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.indirect {
            write!(f, "I{}", self.content_id)
        } else {
            write!(f, "{}", self.content_id)
        }
    }
}

impl FromStr for ObjectId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, CoreError> {
        if let Some(rest) = s.strip_prefix('I') {
            Ok(ObjectId::indirect(rest.parse()?))
        } else {
            Ok(ObjectId::direct(s.parse()?))
        }
    }
}

#[derive(Clone, Debug)]
pub struct ObjectWriterOptions {
    pub prefix: Option<u8>,
    pub compress: bool,
    pub chunker: ChunkerParams,
}

impl Default for ObjectWriterOptions {
    fn default() -> Self {
        Self { prefix: None, compress: true, chunker: ChunkerParams::default() }
    }
}

/// An ordered list of child object ids -- the payload of an indirect object.
/// Kept to JSON for the same reason manifests are: small, human-legible,
/// diffable, and never itself large enough to matter for compression.
///
/// Entries are `ObjectID` strings, not bare `ContentID`s, so a child may
/// itself be indirect: a list that outgrows one content blob is rewritten
/// as a tree of lists, each level still indirect over its own content.
#[derive(serde::Serialize, serde::Deserialize)]
struct ChunkList {
    chunks: Vec<String>,
}

fn chunk_stream(data: &[u8], params: &ChunkerParams) -> Vec<std::ops::Range<usize>> {
    if data.is_empty() {
        return vec![0..0];
    }
    let mut chunker = Chunker::with_bounds(params.min_size, params.avg_size, params.max_size);
    let mut ranges = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let k = chunker.scan(&data[pos..]);
        if k == 0 {
            break;
        }
        ranges.push(pos..pos + k);
        pos += k;
    }
    if pos < data.len() {
        ranges.push(pos..data.len());
    }
    ranges
}

/// Write `data` as a tree of contents, returning the root `ObjectID`.
pub fn write_object<S: BlobStore + 'static>(
    cm: &ContentManager<S>,
    data: &[u8],
    opts: &ObjectWriterOptions,
    now: i64,
) -> Result<ObjectId, CoreError> {
    let mut chunk_ids = Vec::new();
    for range in chunk_stream(data, &opts.chunker) {
        let id = cm.write_content(&data[range], opts.prefix, now)?;
        chunk_ids.push(ObjectId::direct(id));
    }

    if chunk_ids.len() == 1 {
        return Ok(chunk_ids[0]);
    }

    write_indirect_node(cm, &chunk_ids, opts, now)
}

fn encode_chunk_list(children: &[ObjectId]) -> Result<Vec<u8>, CoreError> {
    let list = ChunkList { chunks: children.iter().map(|id| id.to_string()).collect() };
    serde_json::to_vec(&list).map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "encode chunk list", e.into()))
}

fn decode_chunk_list(bytes: &[u8]) -> Result<Vec<ObjectId>, CoreError> {
    let list: ChunkList = serde_json::from_slice(bytes)
        .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "decode chunk list", e.into()))?;
    list.chunks
        .into_iter()
        .map(|s| s.parse())
        .collect::<Result<Vec<ObjectId>, CoreError>>()
}

/// Write `children` as a list and return an indirect `ObjectID` over it.
///
/// If the list itself would exceed the chunker's configured `max_size` once
/// serialized, it is split in half and each half written as its own
/// (possibly further-split) indirect node, recursively -- so the list of
/// lists still fits, no matter how many leaf chunks the original data had.
fn write_indirect_node<S: BlobStore + 'static>(
    cm: &ContentManager<S>,
    children: &[ObjectId],
    opts: &ObjectWriterOptions,
    now: i64,
) -> Result<ObjectId, CoreError> {
    let encoded = encode_chunk_list(children)?;
    if children.len() <= 1 || encoded.len() <= opts.chunker.max_size {
        let content_id = cm.write_content(&encoded, opts.prefix, now)?;
        return Ok(ObjectId::indirect(content_id));
    }

    let mid = children.len() / 2;
    let left = write_indirect_node(cm, &children[..mid], opts, now)?;
    let right = write_indirect_node(cm, &children[mid..], opts, now)?;
    write_indirect_node(cm, &[left, right], opts, now)
}

/// Read an entire object's bytes. For large objects prefer
/// [`read_object_range`], which avoids materializing chunks outside the
/// requested window.
pub fn read_object<S: BlobStore + 'static>(cm: &ContentManager<S>, id: ObjectId) -> Result<Vec<u8>, CoreError> {
    read_object_range(cm, id, 0, u64::MAX)
}

/// Read `length` bytes starting at `offset` from the object's logical byte
/// stream, resolving only the chunks that overlap the requested range.
pub fn read_object_range<S: BlobStore + 'static>(
    cm: &ContentManager<S>,
    id: ObjectId,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>, CoreError> {
    let leaves = if id.is_indirect() {
        flatten_indirect(cm, id)?
    } else {
        vec![id.content_id()]
    };

    let mut out = Vec::new();
    let mut pos: u64 = 0;
    let end = offset.saturating_add(length);
    for leaf in leaves {
        let info = cm.content_info(&leaf)?;
        let chunk_len = info.original_length as u64;
        let chunk_start = pos;
        let chunk_end = pos + chunk_len;
        pos = chunk_end;

        if chunk_end <= offset || chunk_start >= end {
            continue;
        }
        let bytes = cm.get_content(&leaf)?;
        let from = offset.saturating_sub(chunk_start) as usize;
        let to = (end.min(chunk_end) - chunk_start) as usize;
        out.extend_from_slice(&bytes[from..to]);
        if chunk_end >= end {
            break;
        }
    }
    Ok(out)
}

/// Recursively expand an indirect object into the flat, ordered list of
/// leaf content ids it ultimately refers to, descending into any child that
/// is itself an indirect list.
fn flatten_indirect<S: BlobStore + 'static>(cm: &ContentManager<S>, id: ObjectId) -> Result<Vec<ContentId>, CoreError> {
    let payload = cm.get_content(&id.content_id())?;
    let children = decode_chunk_list(&payload)?;
    let mut leaves = Vec::new();
    for child in children {
        if child.is_indirect() {
            leaves.extend(flatten_indirect(cm, child)?);
        } else {
            leaves.push(child.content_id());
        }
    }
    Ok(leaves)
}

/// `VerifyObject` (§4.4): recursively walk the tree and mark every
/// `ContentID` it depends on, leaves and intermediate list nodes alike --
/// GC's mark phase treats `visited` as the complete live set, so an
/// intermediate node left out of it would be collected as garbage out from
/// under a live object. `visited` is shared across a GC mark's walk of
/// multiple roots so a content (or sub-tree) referenced from two snapshots
/// is only resolved once.
pub fn verify_object<S: BlobStore + 'static>(
    cm: &ContentManager<S>,
    id: ObjectId,
    visited: &mut HashSet<ContentId>,
) -> Result<(), CoreError> {
    if !visited.insert(id.content_id()) {
        return Ok(());
    }
    // Touching the bytes (and its digest check) is what actually verifies
    // this node; a corrupt content surfaces as `Corrupted` here.
    let payload = cm.get_content(&id.content_id())?;

    if id.is_indirect() {
        for child in decode_chunk_list(&payload)? {
            verify_object(cm, child, visited)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvault_store::InMemoryBlobStore;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn manager() -> ContentManager<InMemoryBlobStore> {
        let store = Arc::new(InMemoryBlobStore::new());
        let index = Arc::new(pvault_store::IndexManager::new(store.clone()));
        let crypt = Arc::new(pvault_tools::crypt::CryptConfig::new([4u8; 32]).unwrap());
        ContentManager::new(store, index, crypt, true, true, 4096, 2, 64, false, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn small_object_is_direct() {
        let cm = manager();
        let id = write_object(&cm, b"tiny payload", &ObjectWriterOptions::default(), 0).unwrap();
        assert!(!id.is_indirect());
        assert_eq!(read_object(&cm, id).unwrap(), b"tiny payload");
    }

    #[test]
    fn large_object_fans_out_and_round_trips() {
        let cm = manager();
        let opts = ObjectWriterOptions {
            chunker: ChunkerParams { min_size: 256, avg_size: 1024, max_size: 4096 },
            ..Default::default()
        };
        let mut data = Vec::new();
        for i in 0..200_000u32 {
            data.extend_from_slice(&i.to_le_bytes());
        }
        let id = write_object(&cm, &data, &opts, 0).unwrap();
        assert!(id.is_indirect());
        assert_eq!(read_object(&cm, id).unwrap(), data);
    }

    #[test]
    fn deeply_nested_object_round_trips_and_marks_every_intermediate_node() {
        let cm = manager();
        let opts = ObjectWriterOptions {
            chunker: ChunkerParams { min_size: 64, avg_size: 128, max_size: 256 },
            ..Default::default()
        };
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

        let id = write_object(&cm, &data, &opts, 0).unwrap();
        assert!(id.is_indirect());
        assert_eq!(read_object(&cm, id).unwrap(), data, "depth >= 3 indirection must round-trip exactly");

        let leaf_count = flatten_indirect(&cm, id).unwrap().len();
        let mut visited = HashSet::new();
        verify_object(&cm, id, &mut visited).unwrap();
        assert!(
            visited.len() > leaf_count,
            "intermediate list nodes must be marked live too, not just leaf chunks"
        );
    }

    #[test]
    fn range_read_returns_only_the_requested_window() {
        let cm = manager();
        let opts = ObjectWriterOptions {
            chunker: ChunkerParams { min_size: 256, avg_size: 1024, max_size: 4096 },
            ..Default::default()
        };
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let id = write_object(&cm, &data, &opts, 0).unwrap();
        let window = read_object_range(&cm, id, 12_345, 1_000).unwrap();
        assert_eq!(window, data[12_345..12_345 + 1_000]);
    }

    #[test]
    fn verify_object_visits_every_leaf_and_tolerates_shared_content() {
        let cm = manager();
        let opts = ObjectWriterOptions {
            chunker: ChunkerParams { min_size: 256, avg_size: 1024, max_size: 4096 },
            ..Default::default()
        };
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 97) as u8).collect();
        let a = write_object(&cm, &data, &opts, 0).unwrap();
        let b = write_object(&cm, &data, &opts, 0).unwrap(); // same bytes, dedups at content level

        let mut visited = HashSet::new();
        verify_object(&cm, a, &mut visited).unwrap();
        let after_a = visited.len();
        verify_object(&cm, b, &mut visited).unwrap();
        assert_eq!(visited.len(), after_a, "fully-deduplicated object adds no new content ids");
    }

    #[test]
    fn object_id_display_round_trips() {
        let direct = ObjectId::direct(ContentId::new(None, [1u8; 32]).unwrap());
        let indirect = ObjectId::indirect(ContentId::new(Some(b'a'), [2u8; 32]).unwrap());
        assert_eq!(direct, direct.to_string().parse().unwrap());
        assert_eq!(indirect, indirect.to_string().parse().unwrap());
    }

    #[test]
    fn empty_object_round_trips() {
        let cm = manager();
        let id = write_object(&cm, b"", &ObjectWriterOptions::default(), 0).unwrap();
        assert_eq!(read_object(&cm, id).unwrap(), b"");
    }
}
