//! Two-phase mark/sweep garbage collection (§4.6).
//!
//! Mark soft-deletes everything unreferenced and records what it did as a
//! `gc-mark` manifest. Drop only physically removes tombstones once two
//! successful marks have been observed far enough apart that any snapshot
//! racing the first mark must have finished and been re-marked live by the
//! second.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use pvault_api_types::{CoreError, ErrorKind, GarbageCollectionStatus};
use pvault_store::{BlobStore, CompactionOptions, ContentFilter, ContentManager};
use pvault_tools::observability::ObservabilityContext;

use crate::manifest::{LabelSelector, ManifestStore, MANIFEST_CHECKPOINT_PREFIX, MANIFEST_PREFIX};
use crate::object::{self, ObjectId};

/// Prefixes that denote content the engine itself depends on -- the
/// manifest payloads and their checkpoint -- which must never be garbage
/// collected regardless of whether anything currently references them.
fn is_system_content(prefix: Option<u8>) -> bool {
    matches!(prefix, Some(MANIFEST_PREFIX) | Some(MANIFEST_CHECKPOINT_PREFIX))
}

#[derive(Clone, Debug)]
pub struct GcOptions {
    /// Content younger than this (relative to the mark's `now`) is never a
    /// candidate, however unreferenced it looks -- it may belong to a
    /// snapshot still being assembled.
    pub min_content_age_seconds: i64,
    pub safety_margin_between_gc_seconds: i64,
    pub extra_safety_margin_seconds: i64,
    pub batch_size: usize,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            min_content_age_seconds: 24 * 3600,
            safety_margin_between_gc_seconds: pvault_buildcfg::DEFAULT_GC_SAFETY_MARGIN_SECONDS,
            extra_safety_margin_seconds: pvault_buildcfg::DEFAULT_GC_EXTRA_SAFETY_MARGIN_SECONDS,
            batch_size: 10_000,
        }
    }
}

/// The root object a `type=snapshot` manifest points at. Only the one field
/// GC needs to walk the tree; everything else about a snapshot manifest is
/// opaque to this layer.
#[derive(Serialize, Deserialize)]
pub struct SnapshotRoot {
    pub root_object_id: String,
}

#[derive(Serialize, Deserialize)]
struct GcMarkRecord {
    live_snapshots: Vec<String>,
    marked_content: Vec<String>,
    start_time: i64,
    end_time: i64,
}

fn snapshot_type_selector() -> LabelSelector {
    [("type".to_string(), "snapshot".to_string())].into_iter().collect()
}

fn gc_mark_type_selector() -> LabelSelector {
    [("type".to_string(), "gc-mark".to_string())].into_iter().collect()
}

fn snapshot_roots<S: BlobStore + 'static>(manifests: &ManifestStore<S>) -> Result<Vec<ObjectId>, CoreError> {
    let mut roots = Vec::new();
    for id in manifests.find(&snapshot_type_selector()) {
        let (_, payload) = manifests.get(&id)?;
        let decoded: SnapshotRoot = serde_json::from_slice(&payload)
            .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "decode snapshot root", e.into()))?;
        roots.push(decoded.root_object_id.parse()?);
    }
    Ok(roots)
}

/// Run the mark phase: soft-delete every content not reachable from a live
/// snapshot root, not recently written, and not itself engine bookkeeping.
pub fn run_mark<S: BlobStore + 'static>(
    content: &ContentManager<S>,
    manifests: &ManifestStore<S>,
    opts: &GcOptions,
    now: i64,
    obs: &ObservabilityContext,
) -> Result<GarbageCollectionStatus, CoreError> {
    let roots = snapshot_roots(manifests)?;

    let mut visited = HashSet::new();
    for root in &roots {
        object::verify_object(content, *root, &mut visited)?;
    }

    let mut status = GarbageCollectionStatus::default();
    let mut candidates = Vec::new();
    content.iterate_contents(&ContentFilter { prefix: None, include_deleted: false }, |info| {
        status.disk_chunks += 1;
        status.disk_bytes += info.packed_length as u64;

        if is_system_content(info.content_id.prefix()) {
            return;
        }
        if visited.contains(&info.content_id) {
            return;
        }
        if info.timestamp_seconds > now - opts.min_content_age_seconds {
            return; // too recent to be sure it's truly unreferenced
        }
        candidates.push(info.content_id);
    });

    for batch in candidates.chunks(opts.batch_size) {
        for id in batch {
            content.delete_content(id, now)?;
            status.pending_chunks += 1;
            if let Ok(info) = content.content_info(id) {
                status.pending_bytes += info.packed_length as u64;
            }
        }
    }

    let record = GcMarkRecord {
        live_snapshots: roots.iter().map(|r| r.to_string()).collect(),
        marked_content: candidates.iter().map(|c| c.to_string()).collect(),
        start_time: now,
        end_time: now,
    };
    let encoded = serde_json::to_vec(&record)
        .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "encode gc-mark record", e.into()))?;
    manifests.put(gc_mark_type_selector(), encoded, now)?;
    manifests.flush(now)?;
    content.flush(obs)?;

    obs.info(format!(
        "gc mark: examined {} content(s), marked {} for deletion",
        status.disk_chunks, status.pending_chunks
    ));
    Ok(status)
}

/// Run the drop phase: if two successful marks are far enough apart,
/// physically remove tombstones older than the safe cutoff via index
/// compaction. Returns `Ok(None)` if no drop is eligible yet.
pub fn run_drop<S: BlobStore + 'static>(
    content: &ContentManager<S>,
    manifests: &ManifestStore<S>,
    opts: &GcOptions,
    now: i64,
    obs: &ObservabilityContext,
) -> Result<Option<GarbageCollectionStatus>, CoreError> {
    let mut records = Vec::new();
    for id in manifests.find(&gc_mark_type_selector()) {
        let (_, payload) = manifests.get(&id)?;
        let record: GcMarkRecord = serde_json::from_slice(&payload)
            .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "decode gc-mark record", e.into()))?;
        records.push(record);
    }
    records.sort_by_key(|r| r.start_time);

    let (Some(latest), Some(previous)) = (records.last(), records.len().checked_sub(2).map(|i| &records[i])) else {
        obs.debug("gc drop: fewer than two gc-mark records, nothing eligible yet");
        return Ok(None);
    };

    let t0 = latest.start_time;
    let t1 = previous.end_time;
    if t0 - t1 < opts.safety_margin_between_gc_seconds {
        obs.debug("gc drop: safety margin between the last two marks not yet satisfied");
        return Ok(None);
    }

    let safe_drop_time = t1 - opts.extra_safety_margin_seconds;
    // The drop phase forces a compaction pass regardless of how few index
    // blobs currently exist -- `max_small_blobs` exists to batch up routine
    // quick-cycle compaction, not to gate this safety-critical tombstone
    // sweep.
    let compaction = CompactionOptions {
        max_small_blobs: 1,
        all_indexes: true,
        drop_deleted_before: Some(safe_drop_time),
        ..Default::default()
    };

    let mut status = GarbageCollectionStatus::default();
    content.iterate_contents(&ContentFilter { prefix: None, include_deleted: true }, |info| {
        if info.deleted && info.timestamp_seconds < safe_drop_time {
            status.removed_chunks += 1;
            status.removed_bytes += info.packed_length as u64;
        }
    });

    content.index().compact(&compaction, now, obs)?;
    content.reconcile_pending();
    obs.info(format!(
        "gc drop: physically dropped {} tombstone(s) older than {safe_drop_time}",
        status.removed_chunks
    ));
    Ok(Some(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvault_store::{ContentManager as CM, InMemoryBlobStore, IndexManager};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn harness() -> (Arc<CM<InMemoryBlobStore>>, ManifestStore<InMemoryBlobStore>) {
        let store = Arc::new(InMemoryBlobStore::new());
        let index = Arc::new(IndexManager::new(store.clone()));
        let crypt = Arc::new(pvault_tools::crypt::CryptConfig::new([7u8; 32]).unwrap());
        let content = Arc::new(CM::new(store, index, crypt, true, true, 4096, 2, 64, false, Arc::new(AtomicBool::new(false))));
        let manifests = ManifestStore::new(content.clone());
        (content, manifests)
    }

    #[test]
    fn mark_deletes_unreferenced_content_and_spares_live_and_recent() {
        let (content, manifests) = harness();
        let obs = ObservabilityContext::buffered();

        let live = object::write_object(&content, b"kept forever", &Default::default(), 0).unwrap();
        manifests
            .put(snapshot_type_selector(), serde_json::to_vec(&SnapshotRoot { root_object_id: live.to_string() }).unwrap(), 0)
            .unwrap();

        let garbage = content.write_content(b"nobody points at this", None, 0).unwrap();
        let recent_garbage = content.write_content(b"also unreferenced but brand new", None, 99_000).unwrap();

        let opts = GcOptions { min_content_age_seconds: 3600, ..Default::default() };
        run_mark(&content, &manifests, &opts, 100_000, &obs).unwrap();

        assert!(content.content_info(&garbage).unwrap().deleted);
        assert!(!content.content_info(&recent_garbage).unwrap().deleted, "too-recent content must be spared");
        assert!(!content.content_info(&live.content_id()).unwrap().deleted, "referenced content must be spared");
    }

    #[test]
    fn drop_requires_two_marks_with_a_safety_gap() {
        let (content, manifests) = harness();
        let obs = ObservabilityContext::buffered();
        let opts = GcOptions { safety_margin_between_gc_seconds: 1000, extra_safety_margin_seconds: 100, ..Default::default() };

        run_mark(&content, &manifests, &opts, 0, &obs).unwrap();
        assert!(run_drop(&content, &manifests, &opts, 0, &obs).unwrap().is_none());

        run_mark(&content, &manifests, &opts, 500, &obs).unwrap();
        assert!(run_drop(&content, &manifests, &opts, 500, &obs).unwrap().is_none(), "gap too small");

        run_mark(&content, &manifests, &opts, 2000, &obs).unwrap();
        assert!(run_drop(&content, &manifests, &opts, 2000, &obs).unwrap().is_some());
    }

    #[test]
    fn dropped_tombstone_is_physically_gone_after_a_third_mark() {
        // Per §4.6: a tombstone created by mark N is eligible for physical
        // drop only once a later mark's `safeDropTime` passes it by --
        // `safeDropTime` is derived from the *previous* mark's end time, so
        // it takes a third mark (two full gaps) before the first
        // generation's tombstones clear the cutoff.
        let (content, manifests) = harness();
        let obs = ObservabilityContext::buffered();
        let opts = GcOptions { min_content_age_seconds: 0, safety_margin_between_gc_seconds: 1000, extra_safety_margin_seconds: 0, batch_size: 100 };

        for i in 0..20u8 {
            content.write_content(&[i; 8], None, 0).unwrap();
        }
        let garbage = content.write_content(b"garbage", None, 0).unwrap();

        run_mark(&content, &manifests, &opts, 0, &obs).unwrap();
        assert!(content.get_content(&garbage).is_err(), "soft-deleted content reads as not found");

        run_mark(&content, &manifests, &opts, 1000, &obs).unwrap();
        run_mark(&content, &manifests, &opts, 2500, &obs).unwrap();
        run_drop(&content, &manifests, &opts, 2500, &obs).unwrap();

        assert!(content.index().lookup(&garbage).is_none(), "tombstone should be physically dropped by now");
    }
}
