//! `ContentManager` (§4.2): the write/read path for content-addressed
//! payloads. Owns the currently-open pack buffers; hands sealed packs to a
//! bounded worker pool so the blob-store PUT and index publish happen
//! outside the content-manager mutex (§5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use pvault_api_types::{CoreError, ErrorKind};
use pvault_tools::crypt::CryptConfig;
use pvault_tools::lru_cache::LruCache;
use pvault_tools::observability::ObservabilityContext;

use crate::blob_store::{BlobStore, PutOptions};
use crate::codec;
use crate::content::content_id::ContentId;
use crate::content::info::ContentInfo;
use crate::content::pack::{self, PackBuilder, PackClass};
use crate::index::manager::IndexManager;

/// Filter accepted by `IterateContents` (§4.2).
#[derive(Clone, Debug, Default)]
pub struct ContentFilter {
    pub prefix: Option<u8>,
    pub include_deleted: bool,
}

impl ContentFilter {
    fn matches(&self, info: &ContentInfo) -> bool {
        if let Some(p) = self.prefix {
            if info.content_id.prefix() != Some(p) {
                return false;
            }
        }
        self.include_deleted || !info.deleted
    }
}

struct SealedPack {
    blob_id: String,
    bytes: Vec<u8>,
    entries: Vec<ContentInfo>,
}

/// Background upload worker pool. Sealed packs are framed and hashed
/// outside any lock; this pool performs the blob-store PUT and publishes
/// the pack's index entries, so `WriteContent` never blocks on I/O (§5).
/// The channel is bounded: a slow store backpressures into the caller
/// that triggered the seal (pack overflow or `Flush`).
struct Uploader {
    tx: Option<crossbeam_channel::Sender<SealedPack>>,
    inflight: Arc<(Mutex<usize>, Condvar)>,
    workers: Vec<std::thread::JoinHandle<()>>,
    first_error: Arc<Mutex<Option<CoreError>>>,
}

impl Uploader {
    fn new<S: BlobStore + 'static>(store: Arc<S>, index: Arc<IndexManager<S>>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<SealedPack>(concurrency * 2);
        let inflight = Arc::new((Mutex::new(0usize), Condvar::new()));
        let first_error = Arc::new(Mutex::new(None));

        let mut workers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let rx = rx.clone();
            let store = store.clone();
            let index = index.clone();
            let inflight = inflight.clone();
            let first_error = first_error.clone();
            workers.push(std::thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    let result = store
                        .put(&job.blob_id, &job.bytes, &PutOptions::default())
                        .and_then(|_| index.publish(job.entries, vec![job.blob_id.clone()]).map(|_| ()));
                    if let Err(err) = result {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                    }
                    let (lock, cvar) = &*inflight;
                    let mut count = lock.lock().unwrap();
                    *count -= 1;
                    if *count == 0 {
                        cvar.notify_all();
                    }
                }
            }));
        }

        Self {
            tx: Some(tx),
            inflight,
            workers,
            first_error,
        }
    }

    fn submit(&self, job: SealedPack) {
        let (lock, _) = &*self.inflight;
        *lock.lock().unwrap() += 1;
        self.tx
            .as_ref()
            .expect("uploader channel dropped while jobs are still being submitted")
            .send(job)
            .expect("uploader worker pool outlives its channel");
    }

    /// Block until every submitted job has drained, then surface (and
    /// clear) the first error any worker hit.
    fn drain(&self) -> Result<(), CoreError> {
        let (lock, cvar) = &*self.inflight;
        let mut count = lock.lock().unwrap();
        while *count > 0 {
            count = cvar.wait(count).unwrap();
        }
        drop(count);
        self.first_error.lock().unwrap().take().map_or(Ok(()), Err)
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Shared flag flipped by the repository layer as the upgrade-lock state
/// machine (§4.7) transitions; every write-path entry point checks it.
pub type UpgradeGate = Arc<AtomicBool>;

pub struct ContentManager<S: BlobStore + 'static> {
    store: Arc<S>,
    index: Arc<IndexManager<S>>,
    crypt: Arc<CryptConfig>,
    encrypt: bool,
    compress: bool,
    max_pack_size: u64,
    read_only: bool,
    upgrade_blocked: UpgradeGate,
    open: Mutex<HashMap<PackClass, PackBuilder>>,
    /// Entries visible to this session before they are durable: covers
    /// both not-yet-sealed pack contents and undelete rewrites (§5
    /// ordering guarantee: a write is visible to `ContentInfo` in the
    /// same session the instant `WriteContent` returns).
    pending_index: RwLock<HashMap<ContentId, ContentInfo>>,
    uploader: Uploader,
    read_cache: Mutex<LruCache<ContentId, Vec<u8>>>,
}

impl<S: BlobStore + 'static> ContentManager<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        index: Arc<IndexManager<S>>,
        crypt: Arc<CryptConfig>,
        encrypt: bool,
        compress: bool,
        max_pack_size: u64,
        upload_concurrency: usize,
        read_cache_entries: usize,
        read_only: bool,
        upgrade_blocked: UpgradeGate,
    ) -> Self {
        let uploader = Uploader::new(store.clone(), index.clone(), upload_concurrency);
        Self {
            store,
            index,
            crypt,
            encrypt,
            compress,
            max_pack_size,
            read_only,
            upgrade_blocked,
            open: Mutex::new(HashMap::new()),
            pending_index: RwLock::new(HashMap::new()),
            uploader,
            read_cache: Mutex::new(LruCache::new(read_cache_entries)),
        }
    }

    fn ensure_writable(&self) -> Result<(), CoreError> {
        if self.read_only {
            return Err(CoreError::new(ErrorKind::RepositoryReadOnly, "repository is read-only"));
        }
        if self.upgrade_blocked.load(Ordering::SeqCst) {
            return Err(CoreError::new(ErrorKind::UpgradeInProgress, "format upgrade is draining writers"));
        }
        Ok(())
    }

    fn crypt_key(&self) -> Option<&CryptConfig> {
        if self.encrypt {
            Some(&self.crypt)
        } else {
            None
        }
    }

    fn lookup_any(&self, id: &ContentId) -> Option<ContentInfo> {
        if let Some(info) = self.pending_index.read().unwrap().get(id) {
            return Some(info.clone());
        }
        self.index.lookup(id)
    }

    /// `WriteContent` (§4.2 write path, steps 1-6).
    pub fn write_content(&self, payload: &[u8], prefix: Option<u8>, now: i64) -> Result<ContentId, CoreError> {
        self.ensure_writable()?;

        let content_id = ContentId::new(prefix, self.crypt.compute_digest(payload))?;

        if let Some(existing) = self.lookup_any(&content_id) {
            if !existing.deleted {
                // Step 2: dedup short-circuit. Two concurrent writers of the
                // same payload both land here; only the first actually
                // appended bytes.
                return Ok(content_id);
            }
            // Step 3: undelete. The payload already exists in some pack;
            // emit a fresh index entry whose timestamp beats the GC mark
            // that soft-deleted it (testable property 5).
            let mut undeleted = existing;
            undeleted.deleted = false;
            undeleted.timestamp_seconds = now;
            self.index.publish(vec![undeleted.clone()], vec![undeleted.pack_blob_id.clone()])?;
            self.pending_index.write().unwrap().insert(content_id, undeleted);
            return Ok(content_id);
        }

        self.append_fresh(content_id, payload, prefix, now)
    }

    /// Frame `payload` and append it to the open pack for its class,
    /// sealing and handing off the old one first if it would overflow.
    /// Shared by `write_content` (new content) and `repack_content`
    /// (short-pack compaction relocating existing content, §4.6), which is
    /// why this never consults `pending_index` for a dedup short-circuit --
    /// the caller has already decided a fresh append is wanted.
    fn append_fresh(
        &self,
        content_id: ContentId,
        payload: &[u8],
        prefix: Option<u8>,
        now: i64,
    ) -> Result<ContentId, CoreError> {
        let class = pack::pack_class_for_prefix(prefix);
        let unique_id = {
            let mut u = [0u8; 16];
            u[0] = prefix.unwrap_or(0);
            u
        };
        let framed = codec::encode(payload, self.crypt_key(), &unique_id, self.compress)?;
        let compression_header_id = if self.compress { 1 } else { 0 };
        let encryption_key_id = if self.encrypt { 1 } else { 0 };

        let (blob_id, offset) = {
            let mut open = self.open.lock().unwrap();
            let mut sealed_job = None;

            if let Some(current) = open.get(&class) {
                if current.would_overflow(framed.len() as u64) {
                    let sealed = open.remove(&class).unwrap();
                    let (blob_id, bytes, entries) = sealed.seal();
                    let infos = pack::entries_to_infos(&entries, &blob_id);
                    sealed_job = Some(SealedPack { blob_id, bytes, entries: infos });
                }
            }

            let builder = open
                .entry(class)
                .or_insert_with(|| PackBuilder::new(class, self.max_pack_size));
            let offset = builder.append(
                content_id,
                &framed,
                payload.len() as u32,
                now,
                compression_header_id,
                encryption_key_id,
            );
            let blob_id = builder.blob_id().to_string();

            // Submitting the sealed pack (I/O-bound) happens after we drop
            // the lock below; stash it and release the lock first.
            if let Some(job) = sealed_job.take() {
                drop(open);
                self.uploader.submit(job);
            }

            (blob_id, offset)
        };

        let info = ContentInfo {
            content_id,
            pack_blob_id: blob_id,
            offset_in_pack: offset,
            packed_length: framed.len() as u32,
            original_length: payload.len() as u32,
            timestamp_seconds: now,
            compression_header_id,
            encryption_key_id,
            format_version: 1,
            deleted: false,
        };
        self.pending_index.write().unwrap().insert(content_id, info);

        Ok(content_id)
    }

    /// Relocate an existing content into a freshly-written pack, bypassing
    /// the usual dedup short-circuit. Used by short-pack compaction (§4.6)
    /// to rescue live content out of a pack whose live-byte share has
    /// dropped below the rewrite threshold. The new index entry's later
    /// timestamp wins the merge over the stale one pointing at the old pack.
    pub fn repack_content(&self, id: &ContentId, now: i64) -> Result<(), CoreError> {
        self.ensure_writable()?;
        let payload = self.get_content(id)?;
        self.append_fresh(*id, &payload, id.prefix(), now)?;
        Ok(())
    }

    /// `ContentInfo` (§4.2).
    pub fn content_info(&self, id: &ContentId) -> Result<ContentInfo, CoreError> {
        self.lookup_any(id)
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("content '{id}' not found")))
    }

    fn verify_digest(&self, id: &ContentId, payload: &[u8]) -> Result<(), CoreError> {
        if &self.crypt.compute_digest(payload) != id.digest() {
            return Err(CoreError::new(ErrorKind::Corrupted, format!("digest mismatch for content '{id}'")));
        }
        Ok(())
    }

    /// `GetContent` (§4.2 read path).
    pub fn get_content(&self, id: &ContentId) -> Result<Vec<u8>, CoreError> {
        if let Some(cached) = self.read_cache.lock().unwrap().get_mut(*id) {
            return Ok(cached.clone());
        }

        let info = self
            .lookup_any(id)
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("content '{id}' not found")))?;
        if info.deleted {
            return Err(CoreError::new(ErrorKind::NotFound, format!("content '{id}' is deleted")));
        }

        // Step 2: still in an open pack buffer.
        {
            let open = self.open.lock().unwrap();
            let class = pack::pack_class_for_prefix(id.prefix());
            if let Some(builder) = open.get(&class) {
                if builder.blob_id() == info.pack_blob_id {
                    if let Some(framed) = builder.read_range(info.pack_range()) {
                        let payload = codec::decode(framed, self.crypt_key())?;
                        self.verify_digest(id, &payload)?;
                        self.read_cache.lock().unwrap().insert(*id, payload.clone());
                        return Ok(payload);
                    }
                }
            }
        }

        // Step 3: fetch the byte range from the durable pack blob.
        let framed = self.store.get(&info.pack_blob_id, info.offset_in_pack, info.packed_length as u64)?;
        let payload = codec::decode(&framed, self.crypt_key())?;
        self.verify_digest(id, &payload)?;
        self.read_cache.lock().unwrap().insert(*id, payload.clone());
        Ok(payload)
    }

    /// `DeleteContent` (§4.2): soft-delete by emitting a tombstone index
    /// entry dated `now`.
    pub fn delete_content(&self, id: &ContentId, now: i64) -> Result<(), CoreError> {
        self.ensure_writable()?;
        let mut info = self
            .lookup_any(id)
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("content '{id}' not found")))?;
        if info.deleted {
            return Ok(());
        }
        info.deleted = true;
        info.timestamp_seconds = now;
        self.index.publish(vec![info.clone()], vec![info.pack_blob_id.clone()])?;
        self.pending_index.write().unwrap().insert(*id, info);
        Ok(())
    }

    /// `IterateContents`: visits every content matching `filter` exactly
    /// once, merging the durable index with this session's pending writes.
    pub fn iterate_contents(&self, filter: &ContentFilter, mut cb: impl FnMut(&ContentInfo)) {
        let mut seen: HashMap<ContentId, ContentInfo> = self.index.iter_all().into_iter().map(|i| (i.content_id, i)).collect();
        for (id, info) in self.pending_index.read().unwrap().iter() {
            seen.insert(*id, info.clone());
        }
        for info in seen.values() {
            if filter.matches(info) {
                cb(info);
            }
        }
    }

    /// `Flush`: seal every non-empty open pack, upload it, publish its
    /// index entries, and block until all of that is durable.
    pub fn flush(&self, obs: &ObservabilityContext) -> Result<(), CoreError> {
        if self.upgrade_blocked.load(Ordering::SeqCst) {
            return Err(CoreError::new(ErrorKind::UpgradeInProgress, "format upgrade is draining writers"));
        }

        let sealed: Vec<SealedPack> = {
            let mut open = self.open.lock().unwrap();
            let classes: Vec<PackClass> = open.keys().copied().collect();
            let mut sealed = Vec::new();
            for class in classes {
                if let Some(builder) = open.get(&class) {
                    if builder.is_empty() {
                        continue;
                    }
                }
                let builder = open.remove(&class).unwrap();
                let (blob_id, bytes, entries) = builder.seal();
                let infos = pack::entries_to_infos(&entries, &blob_id);
                sealed.push(SealedPack { blob_id, bytes, entries: infos });
            }
            sealed
        };

        let count = sealed.len();
        for job in sealed {
            self.uploader.submit(job);
        }
        self.uploader.drain()?;
        obs.info(format!("flush: sealed and uploaded {count} pack(s)"));
        Ok(())
    }

    pub fn index(&self) -> &Arc<IndexManager<S>> {
        &self.index
    }

    /// Forget pending-index tombstones the durable index no longer carries
    /// at all -- i.e. ones a GC drop phase physically removed via index
    /// compaction. Live entries are left alone even if absent from the
    /// durable index, since they may simply not be flushed yet.
    pub fn reconcile_pending(&self) {
        let mut pending = self.pending_index.write().unwrap();
        pending.retain(|id, info| !info.deleted || self.index.lookup(id).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::InMemoryBlobStore;

    fn manager(store: Arc<InMemoryBlobStore>) -> ContentManager<InMemoryBlobStore> {
        let index = Arc::new(IndexManager::new(store.clone()));
        let crypt = Arc::new(CryptConfig::new([3u8; 32]).unwrap());
        ContentManager::new(store, index, crypt, true, true, 1_000_000, 2, 64, false, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn write_then_get_round_trips() {
        let mgr = manager(Arc::new(InMemoryBlobStore::new()));
        let id = mgr.write_content(b"hello", None, 100).unwrap();
        assert_eq!(mgr.get_content(&id).unwrap(), b"hello");
    }

    #[test]
    fn duplicate_write_dedups_to_the_same_id() {
        let mgr = manager(Arc::new(InMemoryBlobStore::new()));
        let a = mgr.write_content(b"hello", None, 100).unwrap();
        let b = mgr.write_content(b"hello", None, 200).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_prefixes_give_distinct_ids_for_the_same_bytes() {
        let mgr = manager(Arc::new(InMemoryBlobStore::new()));
        let a = mgr.write_content(b"x", Some(b'a'), 0).unwrap();
        let b = mgr.write_content(b"x", Some(b'b'), 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(mgr.get_content(&a).unwrap(), b"x");
        assert_eq!(mgr.get_content(&b).unwrap(), b"x");
    }

    #[test]
    fn reserved_prefix_is_rejected() {
        let mgr = manager(Arc::new(InMemoryBlobStore::new()));
        let err = mgr.write_content(b"x", Some(b'm'), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn flush_survives_into_a_fresh_session() {
        let store = Arc::new(InMemoryBlobStore::new());
        let obs = ObservabilityContext::buffered();
        let id = {
            let mgr = manager(store.clone());
            let id = mgr.write_content(b"durable", None, 0).unwrap();
            mgr.flush(&obs).unwrap();
            id
        };

        let fresh_index = Arc::new(IndexManager::new(store.clone()));
        fresh_index.refresh(&obs).unwrap();
        let crypt = Arc::new(CryptConfig::new([3u8; 32]).unwrap());
        let fresh = ContentManager::new(store, fresh_index, crypt, true, true, 1_000_000, 2, 64, false, Arc::new(AtomicBool::new(false)));
        assert_eq!(fresh.get_content(&id).unwrap(), b"durable");
    }

    #[test]
    fn delete_then_get_is_not_found_but_write_undeletes() {
        let mgr = manager(Arc::new(InMemoryBlobStore::new()));
        let id = mgr.write_content(b"payload", None, 0).unwrap();
        mgr.delete_content(&id, 10).unwrap();
        assert_eq!(mgr.get_content(&id).unwrap_err().kind(), ErrorKind::NotFound);

        // Race (testable property 5): a fresh write of the same bytes after
        // the delete mark un-deletes it.
        let again = mgr.write_content(b"payload", None, 20).unwrap();
        assert_eq!(again, id);
        assert_eq!(mgr.get_content(&id).unwrap(), b"payload");
    }

    #[test]
    fn write_content_fails_fast_when_upgrade_is_draining() {
        let store = Arc::new(InMemoryBlobStore::new());
        let index = Arc::new(IndexManager::new(store.clone()));
        let crypt = Arc::new(CryptConfig::new([1u8; 32]).unwrap());
        let gate = Arc::new(AtomicBool::new(true));
        let mgr = ContentManager::new(store, index, crypt, true, false, 1_000_000, 1, 8, false, gate);
        let err = mgr.write_content(b"x", None, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpgradeInProgress);
    }

    #[test]
    fn read_only_repository_rejects_writes() {
        let store = Arc::new(InMemoryBlobStore::new());
        let index = Arc::new(IndexManager::new(store.clone()));
        let crypt = Arc::new(CryptConfig::new([1u8; 32]).unwrap());
        let mgr = ContentManager::new(store, index, crypt, true, false, 1_000_000, 1, 8, true, Arc::new(AtomicBool::new(false)));
        let err = mgr.write_content(b"x", None, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RepositoryReadOnly);
    }

    #[test]
    fn pack_overflow_seals_and_uploads_the_old_pack() {
        let store = Arc::new(InMemoryBlobStore::new());
        let obs = ObservabilityContext::buffered();
        let index = Arc::new(IndexManager::new(store.clone()));
        let crypt = Arc::new(CryptConfig::new([2u8; 32]).unwrap());
        // Tiny max pack size: the second write must overflow the first pack.
        let mgr = ContentManager::new(store.clone(), index.clone(), crypt, false, false, 16, 1, 8, false, Arc::new(AtomicBool::new(false)));
        let a = mgr.write_content(b"0123456789abcdef", None, 0).unwrap();
        let b = mgr.write_content(b"different-payload", None, 1).unwrap();
        mgr.flush(&obs).unwrap();

        assert_eq!(mgr.get_content(&a).unwrap(), b"0123456789abcdef");
        assert_eq!(mgr.get_content(&b).unwrap(), b"different-payload");
        let a_pack = index.lookup(&a).unwrap().pack_blob_id;
        let b_pack = index.lookup(&b).unwrap().pack_blob_id;
        assert_ne!(a_pack, b_pack);
    }

    #[test]
    fn iterate_contents_respects_prefix_filter() {
        let mgr = manager(Arc::new(InMemoryBlobStore::new()));
        mgr.write_content(b"a", Some(b'a'), 0).unwrap();
        mgr.write_content(b"b", Some(b'b'), 0).unwrap();
        let mut seen = Vec::new();
        mgr.iterate_contents(
            &ContentFilter { prefix: Some(b'a'), include_deleted: false },
            |info| seen.push(info.content_id),
        );
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].prefix(), Some(b'a'));
    }

    #[test]
    fn zero_length_content_has_a_well_defined_fingerprint() {
        let mgr = manager(Arc::new(InMemoryBlobStore::new()));
        let id = mgr.write_content(b"", None, 0).unwrap();
        assert_eq!(mgr.get_content(&id).unwrap(), b"");
    }
}
