//! `IndexManager` (§4.3): the durable, mergeable `ContentID -> Info` map.
//!
//! Keeps a copy-on-write merged view in memory, refreshed from the blob
//! store on demand. Writers publish newly-sealed packs' entries as fresh
//! index blobs; `compact` implements `CompactIndexes`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use pvault_api_types::{CoreError, ErrorKind};
use pvault_tools::observability::ObservabilityContext;

use crate::blob_store::{BlobStore, PutOptions};
use crate::content::content_id::ContentId;
use crate::content::info::ContentInfo;
use crate::index::compaction_log::CompactionLog;
use crate::index::entry::IndexBlobContents;
use crate::index::merge::merge_all;

pub const INDEX_BLOB_PREFIX: &str = "n";
pub const COMPACTION_LOG_PREFIX: &str = "m";

struct State {
    entries: HashMap<ContentId, ContentInfo>,
    /// Live (non-superseded) index blob ids contributing to `entries`.
    live_index_ids: Vec<String>,
}

pub struct IndexManager<S: BlobStore> {
    store: Arc<S>,
    state: RwLock<State>,
}

/// Parameters for `CompactIndexes` (§4.3 step 2-4).
#[derive(Clone, Debug)]
pub struct CompactionOptions {
    pub max_pack_size: u64,
    pub max_small_blobs: usize,
    pub all_indexes: bool,
    pub drop_deleted_before: Option<i64>,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            max_pack_size: pvault_buildcfg::DEFAULT_MAX_PACK_SIZE,
            max_small_blobs: 16,
            all_indexes: false,
            drop_deleted_before: None,
        }
    }
}

fn random_blob_name(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    openssl::rand::rand_bytes(&mut bytes).expect("system RNG must be available");
    format!("{prefix}{}", hex::encode(bytes))
}

/// Content-addressed index blob name: two compactions that happen to
/// produce byte-identical merged output converge on the same blob id,
/// which is what makes `CompactIndexes` idempotent (testable property 8).
fn content_addressed_index_name(encoded: &[u8]) -> String {
    let digest = openssl::sha::sha256(encoded);
    format!("{INDEX_BLOB_PREFIX}{}", hex::encode(&digest[..16]))
}

impl<S: BlobStore> IndexManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            state: RwLock::new(State {
                entries: HashMap::new(),
                live_index_ids: Vec::new(),
            }),
        }
    }

    pub fn lookup(&self, id: &ContentId) -> Option<ContentInfo> {
        self.state.read().unwrap().entries.get(id).cloned()
    }

    pub fn iter_all(&self) -> Vec<ContentInfo> {
        self.state.read().unwrap().entries.values().cloned().collect()
    }

    /// Reload the merged view from the blob store, applying the visibility
    /// rule for compaction logs whose outputs are all present (§4.3).
    pub fn refresh(&self, obs: &ObservabilityContext) -> Result<(), CoreError> {
        let mut index_ids = Vec::new();
        self.store.list(INDEX_BLOB_PREFIX, &mut |e| index_ids.push(e.id))?;

        let mut log_ids = Vec::new();
        self.store.list(COMPACTION_LOG_PREFIX, &mut |e| log_ids.push(e.id))?;

        let available: HashSet<String> = index_ids.iter().cloned().collect();
        let mut superseded: HashSet<String> = HashSet::new();
        for log_id in &log_ids {
            let meta = self.store.get_metadata(log_id)?;
            let bytes = self.store.get(log_id, 0, meta.length)?;
            let log = CompactionLog::decode(&bytes)?;
            if log.is_fully_applied(&available) {
                superseded.extend(log.inputs.iter().cloned());
            }
        }

        let live_ids: Vec<String> = index_ids.into_iter().filter(|id| !superseded.contains(id)).collect();

        let mut all_entries = Vec::new();
        for id in &live_ids {
            let meta = self.store.get_metadata(id)?;
            let bytes = self.store.get(id, 0, meta.length)?;
            let blob = IndexBlobContents::decode(&bytes)?;
            all_entries.extend(blob.entries);
        }

        let merged = merge_all(all_entries);
        obs.debug(format!(
            "index refresh: {} live index blobs, {} merged entries",
            live_ids.len(),
            merged.len()
        ));

        let mut state = self.state.write().unwrap();
        state.entries = merged.into_iter().map(|e| (e.content_id, e)).collect();
        state.live_index_ids = live_ids;
        Ok(())
    }

    /// Publish a freshly-sealed pack's entries as a new index blob, merging
    /// them into the in-memory view immediately (so a same-session read
    /// sees them without a full `refresh`).
    pub fn publish(&self, entries: Vec<ContentInfo>, pack_table: Vec<String>) -> Result<String, CoreError> {
        if entries.is_empty() {
            return Ok(String::new());
        }
        let mut sorted = entries.clone();
        sorted.sort_by_key(|e| e.content_id.sort_key());
        let blob = IndexBlobContents {
            entries: sorted,
            pack_table,
        };
        let encoded = blob.encode();
        let blob_id = random_blob_name(INDEX_BLOB_PREFIX);
        self.store.put(&blob_id, &encoded, &PutOptions::default())?;

        let mut state = self.state.write().unwrap();
        for e in entries {
            let content_id = e.content_id;
            state
                .entries
                .entry(content_id)
                .and_modify(|cur| *cur = crate::index::merge::merge_one(cur.clone(), e.clone()))
                .or_insert(e);
        }
        state.live_index_ids.push(blob_id.clone());
        Ok(blob_id)
    }

    /// `CompactIndexes` (§4.3 steps 1-7). Returns the new index blob id, or
    /// `None` if nothing needed compacting or the result was a no-op.
    pub fn compact(
        &self,
        options: &CompactionOptions,
        now: i64,
        obs: &ObservabilityContext,
    ) -> Result<Option<String>, CoreError> {
        self.refresh(obs)?;

        let live_ids = self.state.read().unwrap().live_index_ids.clone();
        // A drop cutoff means there is real work to do (physically pruning
        // tombstones) even over a single index blob; the small-blobs
        // threshold only exists to avoid needlessly rewriting a healthy set
        // of already-large indexes during routine compaction.
        if options.drop_deleted_before.is_none() && live_ids.len() < options.max_small_blobs {
            obs.debug("compaction skipped: below max_small_blobs threshold");
            return Ok(None);
        }

        let very_small_threshold = options.max_pack_size / 20;
        let mut very_small = Vec::new();
        let mut medium = Vec::new();
        let mut large = Vec::new();
        for id in &live_ids {
            let meta = self.store.get_metadata(id)?;
            if meta.length > options.max_pack_size {
                large.push(id.clone());
            } else if meta.length < very_small_threshold {
                very_small.push(id.clone());
            } else {
                medium.push(id.clone());
            }
        }

        let non_compacted = very_small.len() + medium.len() + if options.all_indexes { large.len() } else { 0 };

        let candidates: Vec<String> = if very_small.len() as f64 > 0.5 * non_compacted as f64
            && medium.len() + 1 < options.max_small_blobs
        {
            very_small
        } else if options.all_indexes {
            very_small.into_iter().chain(medium).chain(large).collect()
        } else {
            very_small.into_iter().chain(medium).collect()
        };

        if candidates.is_empty() || (candidates.len() < 2 && options.drop_deleted_before.is_none()) {
            obs.debug("compaction skipped: fewer than two candidate blobs");
            return Ok(None);
        }

        let mut candidate_entries = Vec::new();
        for id in &candidates {
            let meta = self.store.get_metadata(id)?;
            let bytes = self.store.get(id, 0, meta.length)?;
            let blob = IndexBlobContents::decode(&bytes)?;
            candidate_entries.extend(blob.entries);
        }

        let mut merged = merge_all(candidate_entries);
        if let Some(cutoff) = options.drop_deleted_before {
            merged.retain(|e| !(e.deleted && e.timestamp_seconds < cutoff));
        }

        let pack_table: Vec<String> = {
            let mut table: Vec<String> = merged.iter().map(|e| e.pack_blob_id.clone()).collect();
            table.sort();
            table.dedup();
            table
        };
        let blob = IndexBlobContents {
            entries: merged,
            pack_table,
        };
        let encoded = blob.encode();
        let new_id = content_addressed_index_name(&encoded);

        if candidates.contains(&new_id) {
            obs.info("compaction is a no-op: merged output matches an existing input");
            return Ok(None);
        }

        self.store.put(&new_id, &encoded, &PutOptions::default())?;

        let log = CompactionLog {
            inputs: candidates,
            outputs: vec![new_id.clone()],
        };
        let log_id = random_blob_name(COMPACTION_LOG_PREFIX);
        self.store.put(
            &log_id,
            &log.encode(),
            &PutOptions {
                set_mod_time: Some(now),
                ..Default::default()
            },
        )?;

        obs.info(format!(
            "compacted {} index blobs into {new_id} (log {log_id})",
            log.inputs.len()
        ));

        self.refresh(obs)?;
        Ok(Some(new_id))
    }
}
