//! Manifest Store (§4.5): the small, label-addressable JSON records layered
//! on top of the content manager -- snapshot manifests, policy objects, and
//! the engine's own `gc-mark` bookkeeping records all live here.
//!
//! Every manifest payload is written under the reserved content prefix `x`;
//! the current manifest set is additionally checkpointed as a single content
//! under the reserved prefix `g` so a fresh session doesn't need to scan
//! every `x`-prefixed content to rebuild the in-memory index. Both prefixes
//! are the ones `pvault_store::content::pack::pack_class_for_prefix` already
//! special-cases into metadata packs.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use pvault_api_types::{CoreError, ErrorKind};
use pvault_store::{BlobStore, ContentFilter, ContentId, ContentManager};

pub const MANIFEST_PREFIX: u8 = b'x';
pub const MANIFEST_CHECKPOINT_PREFIX: u8 = b'g';

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ManifestId([u8; 16]);

impl ManifestId {
    fn random() -> Result<Self, CoreError> {
        let mut bytes = [0u8; 16];
        openssl::rand::rand_bytes(&mut bytes)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "generate manifest id", e.into()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManifestId({self})")
    }
}

impl FromStr for ManifestId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, CoreError> {
        let decoded = hex::decode(s)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "invalid hex manifest id", e.into()))?;
        let bytes: [u8; 16] = decoded
            .try_into()
            .map_err(|_| CoreError::new(ErrorKind::InvalidArgument, "manifest id must be 16 bytes"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ManifestId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ManifestId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One manifest as held in memory: the label map every `Find` call matches
/// against, the JSON payload bytes, and the content this entry is durable as.
#[derive(Clone)]
struct ManifestEntry {
    labels: HashMap<String, String>,
    mod_time_seconds: i64,
    payload: Vec<u8>,
    content_id: ContentId,
}

/// On-disk shape of one manifest payload (content prefix `x`).
#[derive(Serialize, Deserialize)]
struct ManifestPayload {
    labels: HashMap<String, String>,
    mod_time_seconds: i64,
    #[serde(with = "serde_bytes_as_hex")]
    payload: Vec<u8>,
}

/// On-disk shape of the checkpoint content (content prefix `g`): just enough
/// to relocate each manifest's payload content without re-reading it.
#[derive(Serialize, Deserialize)]
struct CheckpointEntry {
    id: ManifestId,
    content_id: String,
}

mod serde_bytes_as_hex {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        hex::encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// A label-equality query: every entry in the map must match exactly for a
/// manifest to be returned by `find`.
pub type LabelSelector = HashMap<String, String>;

fn matches(labels: &HashMap<String, String>, selector: &LabelSelector) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

pub struct ManifestStore<S: BlobStore + 'static> {
    content: Arc<ContentManager<S>>,
    entries: RwLock<HashMap<ManifestId, ManifestEntry>>,
    checkpoint_content_id: RwLock<Option<ContentId>>,
}

impl<S: BlobStore + 'static> ManifestStore<S> {
    pub fn new(content: Arc<ContentManager<S>>) -> Self {
        Self {
            content,
            entries: RwLock::new(HashMap::new()),
            checkpoint_content_id: RwLock::new(None),
        }
    }

    /// Rebuild the in-memory index from the latest live checkpoint content,
    /// if one exists. Called once at repository-open time.
    pub fn load(&self) -> Result<(), CoreError> {
        let mut latest: Option<ContentId> = None;
        let filter = ContentFilter { prefix: Some(MANIFEST_CHECKPOINT_PREFIX), include_deleted: false };
        self.content.iterate_contents(&filter, |info| {
            latest = Some(info.content_id);
        });

        let Some(checkpoint_id) = latest else {
            return Ok(());
        };

        let bytes = self.content.get_content(&checkpoint_id)?;
        let checkpoint: Vec<CheckpointEntry> = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "decode manifest checkpoint", e.into()))?;

        let mut entries = HashMap::new();
        for item in checkpoint {
            let content_id: ContentId = item
                .content_id
                .parse()
                .map_err(|_: CoreError| CoreError::new(ErrorKind::Corrupted, "bad content id in checkpoint"))?;
            let raw = self.content.get_content(&content_id)?;
            let payload: ManifestPayload = serde_json::from_slice(&raw)
                .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "decode manifest payload", e.into()))?;
            entries.insert(
                item.id,
                ManifestEntry {
                    labels: payload.labels,
                    mod_time_seconds: payload.mod_time_seconds,
                    payload: payload.payload,
                    content_id,
                },
            );
        }

        *self.entries.write().unwrap() = entries;
        *self.checkpoint_content_id.write().unwrap() = Some(checkpoint_id);
        Ok(())
    }

    /// Store a new manifest. Every manifest must carry a `type` label --
    /// it is what distinguishes ordinary snapshot manifests from the
    /// engine's own `gc-mark` records and anything else layered on top.
    pub fn put(&self, labels: LabelSelector, payload: Vec<u8>, now: i64) -> Result<ManifestId, CoreError> {
        if !labels.contains_key("type") {
            return Err(CoreError::new(ErrorKind::InvalidArgument, "manifest labels must include a 'type' entry"));
        }

        let id = ManifestId::random()?;
        let on_disk = ManifestPayload { labels: labels.clone(), mod_time_seconds: now, payload: payload.clone() };
        let encoded = serde_json::to_vec(&on_disk)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "encode manifest payload", e.into()))?;
        let content_id = self.content.write_content(&encoded, Some(MANIFEST_PREFIX), now)?;

        self.entries.write().unwrap().insert(
            id,
            ManifestEntry { labels, mod_time_seconds: now, payload, content_id },
        );
        Ok(id)
    }

    pub fn get(&self, id: &ManifestId) -> Result<(LabelSelector, Vec<u8>), CoreError> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(id)
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("manifest '{id}' not found")))?;
        Ok((entry.labels.clone(), entry.payload.clone()))
    }

    /// Delete a manifest. Deleting a `type=snapshot` manifest additionally
    /// requires the caller to restate `hostname`/`username`/`path` (the
    /// identity of the snapshot source) to guard against a selector typo
    /// fanning a delete out to the wrong source, unless `force` is set.
    pub fn delete(&self, id: &ManifestId, confirm: &LabelSelector, force: bool, now: i64) -> Result<(), CoreError> {
        let mut entries = self.entries.write().unwrap();
        let Some(entry) = entries.get(id) else {
            return Ok(());
        };

        if !force && entry.labels.get("type").map(String::as_str) == Some("snapshot") {
            for key in ["hostname", "username", "path"] {
                if entry.labels.get(key) != confirm.get(key) {
                    return Err(CoreError::new(
                        ErrorKind::InvalidArgument,
                        format!("deleting a snapshot manifest requires a matching '{key}' label"),
                    ));
                }
            }
        }

        let content_id = entry.content_id;
        entries.remove(id);
        drop(entries);
        self.content.delete_content(&content_id, now)
    }

    /// Linear scan matching every manifest whose labels are a superset of
    /// `selector`.
    pub fn find(&self, selector: &LabelSelector) -> Vec<ManifestId> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(_, entry)| matches(&entry.labels, selector))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Persist the current manifest set as one checkpoint content, and
    /// soft-delete the previous checkpoint.
    pub fn flush(&self, now: i64) -> Result<(), CoreError> {
        let checkpoint: Vec<CheckpointEntry> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|(id, entry)| CheckpointEntry { id: *id, content_id: entry.content_id.to_string() })
            .collect();

        let encoded = serde_json::to_vec(&checkpoint)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "encode manifest checkpoint", e.into()))?;
        let new_checkpoint = self.content.write_content(&encoded, Some(MANIFEST_CHECKPOINT_PREFIX), now)?;

        let previous = self.checkpoint_content_id.write().unwrap().replace(new_checkpoint);
        if let Some(previous) = previous {
            if previous != new_checkpoint {
                self.content.delete_content(&previous, now)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvault_store::InMemoryBlobStore;
    use std::sync::atomic::AtomicBool;

    fn store() -> ManifestStore<InMemoryBlobStore> {
        let blob_store = Arc::new(InMemoryBlobStore::new());
        let index = Arc::new(pvault_store::IndexManager::new(blob_store.clone()));
        let crypt = Arc::new(pvault_tools::crypt::CryptConfig::new([9u8; 32]).unwrap());
        let content = Arc::new(ContentManager::new(
            blob_store, index, crypt, true, true, 4096, 2, 64, false, Arc::new(AtomicBool::new(false)),
        ));
        ManifestStore::new(content)
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSelector {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn put_then_get_round_trips() {
        let s = store();
        let id = s.put(labels(&[("type", "snapshot")]), b"payload".to_vec(), 0).unwrap();
        let (got_labels, payload) = s.get(&id).unwrap();
        assert_eq!(payload, b"payload");
        assert_eq!(got_labels.get("type").unwrap(), "snapshot");
    }

    #[test]
    fn put_without_type_label_is_rejected() {
        let s = store();
        let err = s.put(labels(&[("hostname", "x")]), b"p".to_vec(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn find_matches_by_label_equality() {
        let s = store();
        let a = s
            .put(labels(&[("type", "snapshot"), ("hostname", "a")]), b"1".to_vec(), 0)
            .unwrap();
        let _b = s
            .put(labels(&[("type", "snapshot"), ("hostname", "b")]), b"2".to_vec(), 0)
            .unwrap();
        let found = s.find(&labels(&[("hostname", "a")]));
        assert_eq!(found, vec![a]);
    }

    #[test]
    fn deleting_a_snapshot_manifest_requires_confirming_its_identity() {
        let s = store();
        let id = s
            .put(
                labels(&[("type", "snapshot"), ("hostname", "h"), ("username", "u"), ("path", "/p")]),
                b"x".to_vec(),
                0,
            )
            .unwrap();

        let wrong = labels(&[("hostname", "other"), ("username", "u"), ("path", "/p")]);
        assert!(s.delete(&id, &wrong, false, 1).is_err());
        assert!(s.get(&id).is_ok());

        let right = labels(&[("hostname", "h"), ("username", "u"), ("path", "/p")]);
        s.delete(&id, &right, false, 1).unwrap();
        assert!(s.get(&id).is_err());
    }

    #[test]
    fn force_delete_skips_the_identity_check() {
        let s = store();
        let id = s
            .put(labels(&[("type", "snapshot"), ("hostname", "h")]), b"x".to_vec(), 0)
            .unwrap();
        s.delete(&id, &LabelSelector::new(), true, 1).unwrap();
        assert!(s.get(&id).is_err());
    }

    #[test]
    fn flush_and_reload_recovers_the_manifest_set() {
        let blob_store = Arc::new(InMemoryBlobStore::new());
        let crypt = Arc::new(pvault_tools::crypt::CryptConfig::new([9u8; 32]).unwrap());
        let obs = pvault_tools::observability::ObservabilityContext::buffered();

        let id = {
            let index = Arc::new(pvault_store::IndexManager::new(blob_store.clone()));
            let content = Arc::new(ContentManager::new(
                blob_store.clone(), index, crypt.clone(), true, true, 4096, 2, 64, false,
                Arc::new(AtomicBool::new(false)),
            ));
            let s = ManifestStore::new(content.clone());
            let id = s.put(labels(&[("type", "policy")]), b"keep-3-daily".to_vec(), 5).unwrap();
            s.flush(6).unwrap();
            content.flush(&obs).unwrap();
            id
        };

        let fresh_index = Arc::new(pvault_store::IndexManager::new(blob_store.clone()));
        fresh_index.refresh(&obs).unwrap();
        let fresh_content = Arc::new(ContentManager::new(
            blob_store, fresh_index, crypt, true, true, 4096, 2, 64, false,
            Arc::new(AtomicBool::new(false)),
        ));
        let reloaded = ManifestStore::new(fresh_content);
        reloaded.load().unwrap();
        let (_, payload) = reloaded.get(&id).unwrap();
        assert_eq!(payload, b"keep-3-daily");
    }

    #[test]
    fn flush_supersedes_the_previous_checkpoint() {
        let s = store();
        s.put(labels(&[("type", "snapshot")]), b"1".to_vec(), 0).unwrap();
        s.flush(1).unwrap();
        let first_checkpoint = s.checkpoint_content_id.read().unwrap().unwrap();

        s.put(labels(&[("type", "snapshot")]), b"2".to_vec(), 2).unwrap();
        s.flush(3).unwrap();
        let second_checkpoint = s.checkpoint_content_id.read().unwrap().unwrap();

        assert_ne!(first_checkpoint, second_checkpoint);
        assert!(s.content.content_info(&first_checkpoint).unwrap().deleted);
    }
}
