//! Maintenance scheduler (§4.6): ownership enforcement, the local exclusive
//! lock, and the quick/full/auto cycle selection built on top of [`gc`] and
//! [`pack_rewrite`].
//!
//! The schedule record (`nextQuick`/`nextFull`, owner identity) lives in the
//! repository itself, the same way a `gc-mark` run record does: as a
//! manifest under a reserved `type` label, so every client sees the same
//! due-ness without needing its own copy. The *local* half of the
//! coordination -- one exclusive holder per host -- is a plain advisory
//! file lock (`pvault_tools::process_locker`); per §4.6, if this process
//! already holds it, a second `run` call is a no-op rather than an error.

pub mod gc;
pub mod pack_rewrite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pvault_api_types::{CoreError, ErrorKind, GarbageCollectionStatus};
use pvault_config::MaintenanceSchedule;
use pvault_store::{BlobStore, CompactionOptions, ContentManager};
use pvault_tools::observability::ObservabilityContext;
use pvault_tools::process_locker::ProcessLocker;

use crate::manifest::{LabelSelector, ManifestStore};

const SCHEDULE_TYPE: &str = "maintenance-schedule";
const DRAINED_PACKS_TYPE: &str = "drained-packs";

fn schedule_selector() -> LabelSelector {
    [("type".to_string(), SCHEDULE_TYPE.to_string())].into_iter().collect()
}

fn drained_packs_selector() -> LabelSelector {
    [("type".to_string(), DRAINED_PACKS_TYPE.to_string())].into_iter().collect()
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MaintenanceMode {
    Quick,
    Full,
    /// Runs whichever of quick/full is the smallest cycle currently due.
    Auto,
}

/// Result of one `MaintenanceRunner::run` call that actually did work.
#[derive(Clone, Debug, Default)]
pub struct MaintenanceReport {
    pub ran_quick: bool,
    pub ran_full: bool,
    pub packs_rewritten: usize,
    pub indexes_compacted: bool,
    pub gc: Option<GarbageCollectionStatus>,
}

pub struct MaintenanceRunner<S: BlobStore + 'static> {
    content: Arc<ContentManager<S>>,
    store: Arc<S>,
    manifests: Arc<ManifestStore<S>>,
    locker: Arc<Mutex<ProcessLocker>>,
    gc_opts: gc::GcOptions,
    live_byte_share_threshold: f64,
    unreferenced_blob_safety_seconds: i64,
    quick_interval_seconds: i64,
    full_interval_seconds: i64,
}

impl<S: BlobStore + 'static> MaintenanceRunner<S> {
    pub fn new(
        content: Arc<ContentManager<S>>,
        store: Arc<S>,
        manifests: Arc<ManifestStore<S>>,
        locker: Arc<Mutex<ProcessLocker>>,
        gc_opts: gc::GcOptions,
        quick_interval_seconds: i64,
        full_interval_seconds: i64,
    ) -> Self {
        Self {
            content,
            store,
            manifests,
            locker,
            gc_opts,
            live_byte_share_threshold: pack_rewrite::DEFAULT_LIVE_BYTE_SHARE_THRESHOLD,
            unreferenced_blob_safety_seconds: pvault_buildcfg::DEFAULT_UNREFERENCED_BLOB_SAFETY_SECONDS,
            quick_interval_seconds,
            full_interval_seconds,
        }
    }

    fn load_schedule(&self, default_owner: &str) -> Result<MaintenanceSchedule, CoreError> {
        let found = self.manifests.find(&schedule_selector());
        if let Some(id) = found.into_iter().next() {
            let (_, payload) = self.manifests.get(&id)?;
            serde_json::from_slice(&payload)
                .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "decode maintenance schedule", e.into()))
        } else {
            Ok(MaintenanceSchedule::new(default_owner, self.quick_interval_seconds, self.full_interval_seconds))
        }
    }

    /// Persist `sched`, replacing any previous schedule record. Per §4.6
    /// this must happen *before* the cycle's work begins, so a crash
    /// mid-cycle doesn't cause an immediate re-run.
    fn save_schedule(&self, sched: &MaintenanceSchedule, now: i64) -> Result<(), CoreError> {
        let stale = self.manifests.find(&schedule_selector());
        let encoded = serde_json::to_vec(sched)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "encode maintenance schedule", e.into()))?;
        self.manifests.put(schedule_selector(), encoded, now)?;
        for id in stale {
            self.manifests.delete(&id, &LabelSelector::new(), true, now)?;
        }
        self.manifests.flush(now)
    }

    /// The persisted record of which packs short-pack rewrite has fully
    /// drained and when, so the deletion safety window survives a restart.
    fn load_drained_packs(&self) -> Result<HashMap<String, i64>, CoreError> {
        let found = self.manifests.find(&drained_packs_selector());
        if let Some(id) = found.into_iter().next() {
            let (_, payload) = self.manifests.get(&id)?;
            serde_json::from_slice(&payload)
                .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "decode drained-pack record", e.into()))
        } else {
            Ok(HashMap::new())
        }
    }

    fn save_drained_packs(&self, drained_at: &HashMap<String, i64>, now: i64) -> Result<(), CoreError> {
        let stale = self.manifests.find(&drained_packs_selector());
        let encoded = serde_json::to_vec(drained_at)
            .map_err(|e| CoreError::wrap(ErrorKind::InvalidArgument, "encode drained-pack record", e.into()))?;
        self.manifests.put(drained_packs_selector(), encoded, now)?;
        for id in stale {
            self.manifests.delete(&id, &LabelSelector::new(), true, now)?;
        }
        self.manifests.flush(now)
    }

    /// Run a maintenance cycle as `caller_id`. Returns `Ok(None)` if the
    /// cycle was skipped for a benign reason (not due under `auto`, or this
    /// process already holds the local lock); returns `Err(NotOwned)` if
    /// `caller_id` is not the schedule's designated owner.
    pub fn run(
        &self,
        mode: MaintenanceMode,
        caller_id: &str,
        now: i64,
        obs: &ObservabilityContext,
    ) -> Result<Option<MaintenanceReport>, CoreError> {
        let mut sched = self.load_schedule(caller_id)?;
        if !sched.is_owned_by(caller_id) {
            return Err(CoreError::new(
                ErrorKind::NotOwned,
                format!("maintenance on this repository is owned by '{}', not '{caller_id}'", sched.owner),
            ));
        }

        let guard = match ProcessLocker::try_exclusive_lock(self.locker.clone()) {
            Ok(guard) => guard,
            Err(_) => {
                obs.info("maintenance lock already held locally; this run is a no-op");
                return Ok(None);
            }
        };

        let (run_quick, run_full) = match mode {
            MaintenanceMode::Quick => (true, false),
            MaintenanceMode::Full => (true, true),
            MaintenanceMode::Auto => {
                let full = sched.full_due(now);
                let quick = full || sched.quick_due(now);
                (quick, full)
            }
        };

        if !run_quick {
            obs.debug("auto maintenance: nothing due");
            return Ok(None);
        }

        if run_full {
            sched.mark_full_started(now);
        } else {
            sched.mark_quick_started(now);
        }
        self.save_schedule(&sched, now)?;

        let mut report = MaintenanceReport { ran_quick: true, ran_full: run_full, ..Default::default() };

        let (pack_stats, newly_drained) =
            pack_rewrite::rewrite_short_packs(&self.content, &*self.store, self.live_byte_share_threshold, now, obs)?;
        report.packs_rewritten = pack_stats.packs_rewritten;

        let mut drained_at = self.load_drained_packs()?;
        for pack_id in newly_drained {
            drained_at.entry(pack_id).or_insert(now);
        }
        let swept = pack_rewrite::sweep_drained_packs(&*self.store, &drained_at, self.unreferenced_blob_safety_seconds, now, obs)?;
        for pack_id in &swept {
            drained_at.remove(pack_id);
        }
        self.save_drained_packs(&drained_at, now)?;

        let compacted = self.content.index().compact(&CompactionOptions::default(), now, obs)?;
        report.indexes_compacted = compacted.is_some();

        if run_full {
            let mark_status = gc::run_mark(&self.content, &self.manifests, &self.gc_opts, now, obs)?;
            let drop_status = gc::run_drop(&self.content, &self.manifests, &self.gc_opts, now, obs)?;
            report.gc = Some(drop_status.unwrap_or(mark_status));
        }

        drop(guard);
        obs.info(format!(
            "maintenance cycle complete: quick={} full={} packs_rewritten={} indexes_compacted={}",
            report.ran_quick, report.ran_full, report.packs_rewritten, report.indexes_compacted
        ));
        Ok(Some(report))
    }
}
