//! Upgrade-lock state machine (§4.7).
//!
//! A format-version upgrade needs exclusive access to the repository. The
//! owner places an `UpgradeLock` record inside the repository format blob;
//! every client re-derives its phase from wall-clock time on each refresh.
//! All timing here takes an explicit `now` rather than reading the clock,
//! so the liveness property (testable property 6) can be exercised without
//! sleeping in tests.

use serde::{Deserialize, Serialize};

use pvault_api_types::{CoreError, ErrorKind};

/// A repository-wide record coordinating a format-version upgrade by
/// draining writers before a deadline.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpgradeLock {
    pub owner_id: String,
    pub creation_time: i64,
    /// Seconds of advance notice given to writers before the lock engages.
    /// `None` means no advance notice was configured.
    pub advance_notice_seconds: Option<i64>,
    pub io_drain_timeout_seconds: i64,
    pub status_poll_interval_seconds: i64,
    pub max_permitted_clock_drift_seconds: i64,
    pub old_format_version: u32,
    pub coordinator_url: Option<String>,
}

/// Phase of the upgrade-lock state machine, as observed by a client at a
/// given instant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpgradePhase {
    /// Writers proceed normally but should keep watching for a phase change.
    Unlocked,
    /// Writers must abort with `UpgradeInProgress` on their next I/O
    /// boundary; reads continue.
    LockedDraining,
    /// `now >= upgradeTime`; the owner may perform the upgrade.
    LockedDrained,
}

impl UpgradeLock {
    /// `maxPermittedClockDrift + 2 * ioDrainTimeout`, per §4.7.
    pub fn total_drain_seconds(&self) -> i64 {
        self.max_permitted_clock_drift_seconds + 2 * self.io_drain_timeout_seconds
    }

    /// `creationTime + max(advanceNoticeDuration, totalDrain)`.
    pub fn upgrade_time(&self) -> i64 {
        let advance_notice = self.advance_notice_seconds.unwrap_or(0);
        self.creation_time + advance_notice.max(self.total_drain_seconds())
    }

    /// The phase a client observes at wall-clock `now`.
    ///
    /// Per §4.7: if `advanceNotice < totalDrain` (or unset), the lock is
    /// already `LockedDraining` at `creationTime`. The invariant "drained
    /// implies locked" is enforced by construction here: `upgrade_time()`
    /// is always the phase-2 boundary, so there is no `now` for which the
    /// record can present as drained-but-unlocked.
    pub fn phase_at(&self, now: i64) -> UpgradePhase {
        let total_drain = self.total_drain_seconds();
        let upgrade_time = self.upgrade_time();

        if now >= upgrade_time {
            return UpgradePhase::LockedDrained;
        }

        if let Some(advance_notice) = self.advance_notice_seconds {
            if advance_notice >= total_drain {
                let locked_at = self.creation_time + (advance_notice - total_drain);
                if now < locked_at {
                    return UpgradePhase::Unlocked;
                }
            }
        }

        UpgradePhase::LockedDraining
    }

    /// Whether a `WriteContent`-style call must fail fast at `now`.
    pub fn blocks_writes_at(&self, now: i64) -> bool {
        !matches!(self.phase_at(now), UpgradePhase::Unlocked)
    }

    /// Apply an owner-issued change to `advance_notice_seconds`.
    ///
    /// Per §4.7: only the owner may modify its own lock (checked by the
    /// caller against `caller_id` before reaching here); advance notice may
    /// only be *extended*, never shortened, unset, or newly set where none
    /// existed before.
    pub fn extend_advance_notice(
        &mut self,
        caller_id: &str,
        new_advance_notice_seconds: i64,
    ) -> Result<(), CoreError> {
        if caller_id != self.owner_id {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "upgrade lock owned by '{}', refusing change from '{caller_id}'",
                    self.owner_id
                ),
            ));
        }

        match self.advance_notice_seconds {
            None => Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "cannot set advance notice on a lock created without one",
            )),
            Some(current) if new_advance_notice_seconds < current => Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "advance notice may only be extended, never shortened",
            )),
            Some(_) => {
                self.advance_notice_seconds = Some(new_advance_notice_seconds);
                Ok(())
            }
        }
    }
}
