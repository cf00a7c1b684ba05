//! Upgrade-lock orchestration (§4.7): folds `pvault_config::UpgradeLock`'s
//! pure phase computation and an optional external coordinator probe into
//! the single `UpgradeGate` flag every write-path entry point consults.
//!
//! `pvault_config::UpgradeLock::phase_at` is a pure function of wall-clock
//! time; this module is the seam where that gets turned into the
//! process-wide latch `pvault_store::ContentManager` checks on every write,
//! and where the optional coordinator gets a say.

use std::sync::atomic::Ordering;

use pvault_api_types::{CoreError, ErrorKind};
use pvault_config::{UpgradeLock, UpgradePhase};
use pvault_store::UpgradeGate;

/// External coordinator interface probed by `IsLocked` when an
/// `UpgradeLock` names a `coordinator_url` (§4.7). Left as a trait for the
/// same reason `BlobStore` is: the concrete HTTP transport is an external
/// collaborator and out of scope for this engine (§1).
pub trait CoordinatorProbe: Send + Sync {
    fn probe(&self, url: &str) -> Result<CoordinatorResponse, CoreError>;
}

/// Outcome of a coordinator probe, collapsed from its status-code contract
/// (§6): 200 proceeds, 423 overrides to not-yet-locked. Any other response
/// a concrete `CoordinatorProbe` observes (non-200/423 status, timeout,
/// connection refused) must be surfaced as `Err` with kind
/// `UpgradeCoordinatorUnavailable` -- never silently mapped to either
/// variant here (§9).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CoordinatorResponse {
    Proceed,
    NotYetLocked,
}

/// Resolve the effective upgrade phase for `lock` at `now`, folding in a
/// coordinator probe when `lock.coordinator_url` is set and a probe is
/// supplied. With no coordinator configured (or none supplied, e.g. a
/// caller that hasn't wired one up yet), the locally-computed phase is
/// authoritative.
pub fn effective_phase(
    lock: &UpgradeLock,
    now: i64,
    coordinator: Option<&dyn CoordinatorProbe>,
) -> Result<UpgradePhase, CoreError> {
    let local_phase = lock.phase_at(now);

    let (Some(url), Some(coordinator)) = (lock.coordinator_url.as_deref(), coordinator) else {
        return Ok(local_phase);
    };

    match coordinator.probe(url)? {
        CoordinatorResponse::Proceed => Ok(local_phase),
        CoordinatorResponse::NotYetLocked => Ok(UpgradePhase::Unlocked),
    }
}

/// Recompute `gate` from `lock`'s phase at `now` -- the periodic refresh
/// every client performs (§4.7). Write APIs consult `gate` directly rather
/// than recomputing the phase on every call; a repository with no upgrade
/// lock in its format blob always clears the gate.
pub fn refresh_gate(
    gate: &UpgradeGate,
    lock: Option<&UpgradeLock>,
    now: i64,
    coordinator: Option<&dyn CoordinatorProbe>,
) -> Result<(), CoreError> {
    let blocked = match lock {
        None => false,
        Some(lock) => !matches!(effective_phase(lock, now, coordinator)?, UpgradePhase::Unlocked),
    };
    gate.store(blocked, Ordering::SeqCst);
    Ok(())
}

/// Apply an owner-issued extension to `lock.advance_notice_seconds`,
/// rejecting callers other than the lock's own owner (§4.7 update rules).
pub fn extend_advance_notice(
    lock: &mut UpgradeLock,
    caller_id: &str,
    new_advance_notice_seconds: i64,
) -> Result<(), CoreError> {
    lock.extend_advance_notice(caller_id, new_advance_notice_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn lock_with_coordinator(url: &str) -> UpgradeLock {
        UpgradeLock {
            owner_id: "admin@backup".into(),
            creation_time: 0,
            advance_notice_seconds: Some(0),
            io_drain_timeout_seconds: 900,
            status_poll_interval_seconds: 30,
            max_permitted_clock_drift_seconds: 60,
            old_format_version: 1,
            coordinator_url: Some(url.to_string()),
        }
    }

    struct Always(CoordinatorResponse);
    impl CoordinatorProbe for Always {
        fn probe(&self, _url: &str) -> Result<CoordinatorResponse, CoreError> {
            Ok(self.0)
        }
    }

    struct Unreachable;
    impl CoordinatorProbe for Unreachable {
        fn probe(&self, url: &str) -> Result<CoordinatorResponse, CoreError> {
            Err(CoreError::new(ErrorKind::UpgradeCoordinatorUnavailable, format!("no route to {url}")))
        }
    }

    #[test]
    fn no_coordinator_configured_uses_local_phase() {
        let lock = UpgradeLock {
            coordinator_url: None,
            ..lock_with_coordinator("http://ignored")
        };
        assert_eq!(effective_phase(&lock, 1, None).unwrap(), UpgradePhase::LockedDraining);
    }

    #[test]
    fn coordinator_423_overrides_to_unlocked() {
        let lock = lock_with_coordinator("http://coordinator/status");
        let probe = Always(CoordinatorResponse::NotYetLocked);
        assert_eq!(effective_phase(&lock, 1, Some(&probe)).unwrap(), UpgradePhase::Unlocked);
    }

    #[test]
    fn coordinator_200_keeps_local_phase() {
        let lock = lock_with_coordinator("http://coordinator/status");
        let probe = Always(CoordinatorResponse::Proceed);
        assert_eq!(effective_phase(&lock, 1, Some(&probe)).unwrap(), UpgradePhase::LockedDraining);
    }

    #[test]
    fn unreachable_coordinator_is_an_error_not_an_override() {
        let lock = lock_with_coordinator("http://coordinator/status");
        let probe = Unreachable;
        let err = effective_phase(&lock, 1, Some(&probe)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpgradeCoordinatorUnavailable);
    }

    #[test]
    fn refresh_gate_blocks_writes_once_locked() {
        let gate: UpgradeGate = Arc::new(AtomicBool::new(false));
        let lock = lock_with_coordinator("http://coordinator/status");
        refresh_gate(&gate, Some(&lock), 1, None).unwrap();
        assert!(gate.load(Ordering::SeqCst));
    }

    #[test]
    fn refresh_gate_clears_when_no_lock_is_present() {
        let gate: UpgradeGate = Arc::new(AtomicBool::new(true));
        refresh_gate(&gate, None, 1, None).unwrap();
        assert!(!gate.load(Ordering::SeqCst));
    }
}
