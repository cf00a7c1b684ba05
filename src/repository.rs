//! Top-level facade (§4): the single entry point a caller opens once per
//! session, composing the format blob, content manager, manifest store, and
//! the upgrade gate that guards every write.
//!
//! `create`/`open` mirror the repository format blob's role as the thing
//! every session reads before doing anything else (`pvault_buildcfg::FORMAT_BLOB_NAME`).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use pvault_api_types::{CoreError, ErrorKind};
use pvault_config::{ChunkerParams, LocalConfig, RepositoryFormat};
use pvault_store::{BlobStore, ContentManager, IndexManager, PutOptions, UpgradeGate};
use pvault_tools::crypt::CryptConfig;
use pvault_tools::observability::ObservabilityContext;
use pvault_tools::process_locker::ProcessLocker;

use crate::maintenance::{gc::GcOptions, MaintenanceRunner};
use crate::manifest::ManifestStore;
use crate::object::{self, ObjectId, ObjectWriterOptions};
use crate::upgrade::{self, CoordinatorProbe};

/// An attached repository: everything a caller needs above the blob store
/// boundary, wired together from one format blob.
pub struct Repository<S: BlobStore + 'static> {
    store: Arc<S>,
    format: RepositoryFormat,
    local: LocalConfig,
    content: Arc<ContentManager<S>>,
    manifests: Arc<ManifestStore<S>>,
    upgrade_gate: UpgradeGate,
}

impl<S: BlobStore + 'static> Repository<S> {
    /// Initialize a brand-new, empty repository: write the format blob
    /// (failing if one already exists) and open against it.
    pub fn create(
        store: Arc<S>,
        local: LocalConfig,
        chunker: ChunkerParams,
        raw_key: [u8; 32],
        now: i64,
    ) -> Result<Self, CoreError> {
        chunker.validate()?;
        let format = RepositoryFormat::new(chunker);
        let encoded = serde_json::to_vec(&format)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "encode repository format", e.into()))?;

        let opts = PutOptions { do_not_recreate: true, set_mod_time: Some(now), ..Default::default() };
        store.put(pvault_buildcfg::FORMAT_BLOB_NAME, &encoded, &opts)?;

        Self::open_with_format(store, local, format, raw_key, now)
    }

    /// Attach to an existing repository, reading its format blob.
    pub fn open(store: Arc<S>, local: LocalConfig, raw_key: [u8; 32], now: i64) -> Result<Self, CoreError> {
        let meta = store.get_metadata(pvault_buildcfg::FORMAT_BLOB_NAME)?;
        let bytes = store.get(pvault_buildcfg::FORMAT_BLOB_NAME, 0, meta.length)?;
        let format: RepositoryFormat = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "decode repository format", e.into()))?;
        Self::open_with_format(store, local, format, raw_key, now)
    }

    fn open_with_format(
        store: Arc<S>,
        local: LocalConfig,
        format: RepositoryFormat,
        raw_key: [u8; 32],
        now: i64,
    ) -> Result<Self, CoreError> {
        let obs = ObservabilityContext::global();
        let crypt = Arc::new(
            CryptConfig::new(raw_key).map_err(|e| CoreError::wrap(ErrorKind::AuthenticationFailed, "derive key material", e))?,
        );

        let index = Arc::new(IndexManager::new(store.clone()));
        index.refresh(&obs)?;

        let upgrade_gate: UpgradeGate = Arc::new(AtomicBool::new(false));
        upgrade::refresh_gate(&upgrade_gate, format.upgrade_lock.as_ref(), now, None)?;

        let content = Arc::new(ContentManager::new(
            store.clone(),
            index,
            crypt,
            true,
            true,
            format.max_pack_size,
            local.upload_concurrency,
            (local.read_cache_bytes / 4096).max(1) as usize,
            local.read_only,
            upgrade_gate.clone(),
        ));

        let manifests = Arc::new(ManifestStore::new(content.clone()));
        manifests.load()?;

        Ok(Self { store, format, local, content, manifests, upgrade_gate })
    }

    pub fn manifests(&self) -> &Arc<ManifestStore<S>> {
        &self.manifests
    }

    pub fn content_manager(&self) -> &Arc<ContentManager<S>> {
        &self.content
    }

    pub fn format(&self) -> &RepositoryFormat {
        &self.format
    }

    pub fn local_config(&self) -> &LocalConfig {
        &self.local
    }

    pub fn write_content(&self, payload: &[u8], prefix: Option<u8>, now: i64) -> Result<pvault_store::ContentId, CoreError> {
        self.content.write_content(payload, prefix, now)
    }

    pub fn get_content(&self, id: &pvault_store::ContentId) -> Result<Vec<u8>, CoreError> {
        self.content.get_content(id)
    }

    pub fn write_object(&self, data: &[u8], opts: &ObjectWriterOptions, now: i64) -> Result<ObjectId, CoreError> {
        object::write_object(&self.content, data, opts, now)
    }

    pub fn read_object(&self, id: ObjectId) -> Result<Vec<u8>, CoreError> {
        object::read_object(&self.content, id)
    }

    /// Persist both the content manager's open packs and the manifest
    /// checkpoint. Order matters: manifests reference content ids, so the
    /// content must already be durable before the checkpoint naming it is.
    pub fn flush(&self, now: i64, obs: &ObservabilityContext) -> Result<(), CoreError> {
        self.content.flush(obs)?;
        self.manifests.flush(now)
    }

    /// Recompute the upgrade gate from the format blob's current lock,
    /// optionally consulting an external coordinator (§4.7).
    pub fn refresh_upgrade_gate(&self, now: i64, coordinator: Option<&dyn CoordinatorProbe>) -> Result<(), CoreError> {
        upgrade::refresh_gate(&self.upgrade_gate, self.format.upgrade_lock.as_ref(), now, coordinator)
    }

    /// Build a maintenance runner bound to this repository's content and
    /// manifest stores, backed by a process-local lock file at `lockfile_path`.
    pub fn maintenance_runner(
        &self,
        lockfile_path: impl AsRef<std::path::Path>,
        quick_interval_seconds: i64,
        full_interval_seconds: i64,
    ) -> Result<MaintenanceRunner<S>, CoreError> {
        let locker = ProcessLocker::new(lockfile_path)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "open maintenance lock file", e))?;
        Ok(MaintenanceRunner::new(
            self.content.clone(),
            self.store.clone(),
            self.manifests.clone(),
            locker,
            GcOptions::default(),
            quick_interval_seconds,
            full_interval_seconds,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvault_store::InMemoryBlobStore;

    fn local(owner: &str) -> LocalConfig {
        LocalConfig::new(owner)
    }

    #[test]
    fn create_then_open_round_trips_the_format_blob() {
        let store = Arc::new(InMemoryBlobStore::new());
        let repo = Repository::create(store.clone(), local("root@host"), ChunkerParams::default(), [1u8; 32], 0).unwrap();
        assert_eq!(repo.format().format_version, 1);

        let reopened = Repository::open(store, local("root@host"), [1u8; 32], 1).unwrap();
        assert_eq!(reopened.format().chunker, ChunkerParams::default());
    }

    #[test]
    fn create_twice_is_rejected() {
        let store = Arc::new(InMemoryBlobStore::new());
        Repository::create(store.clone(), local("root@host"), ChunkerParams::default(), [1u8; 32], 0).unwrap();
        let err = Repository::create(store, local("root@host"), ChunkerParams::default(), [1u8; 32], 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn write_and_read_content_round_trips_through_the_facade() {
        let store = Arc::new(InMemoryBlobStore::new());
        let repo = Repository::create(store, local("root@host"), ChunkerParams::default(), [3u8; 32], 0).unwrap();
        let id = repo.write_content(b"hello facade", None, 0).unwrap();
        assert_eq!(repo.get_content(&id).unwrap(), b"hello facade");
    }

    #[test]
    fn write_and_read_object_round_trips_through_the_facade() {
        let store = Arc::new(InMemoryBlobStore::new());
        let repo = Repository::create(store, local("root@host"), ChunkerParams::default(), [4u8; 32], 0).unwrap();
        let data = vec![7u8; 10 * 1024 * 1024];
        let id = repo.write_object(&data, &ObjectWriterOptions::default(), 0).unwrap();
        assert_eq!(repo.read_object(id).unwrap(), data);
    }

    #[test]
    fn flush_persists_manifests_across_a_fresh_session() {
        let store = Arc::new(InMemoryBlobStore::new());
        let obs = ObservabilityContext::buffered();
        let id = {
            let repo = Repository::create(store.clone(), local("root@host"), ChunkerParams::default(), [5u8; 32], 0).unwrap();
            let id = repo
                .manifests()
                .put([("type".to_string(), "policy".to_string())].into_iter().collect(), b"keep-7".to_vec(), 0)
                .unwrap();
            repo.flush(1, &obs).unwrap();
            id
        };

        let reopened = Repository::open(store, local("root@host"), [5u8; 32], 2).unwrap();
        let (_, payload) = reopened.manifests().get(&id).unwrap();
        assert_eq!(payload, b"keep-7");
    }

    #[test]
    fn upgrade_lock_blocks_writes_once_locked() {
        let store = Arc::new(InMemoryBlobStore::new());
        let mut repo = Repository::create(store, local("root@host"), ChunkerParams::default(), [6u8; 32], 0).unwrap();
        let lock = pvault_config::UpgradeLock {
            owner_id: "root@host".into(),
            creation_time: 0,
            advance_notice_seconds: Some(0),
            io_drain_timeout_seconds: 0,
            status_poll_interval_seconds: 30,
            max_permitted_clock_drift_seconds: 0,
            old_format_version: 1,
            coordinator_url: None,
        };
        repo.format.upgrade_lock = Some(lock);
        repo.refresh_upgrade_gate(10, None).unwrap();

        let err = repo.write_content(b"should be blocked", None, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpgradeInProgress);
    }
}
