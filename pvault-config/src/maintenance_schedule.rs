//! Schedule record recording when maintenance is next due, and who owns it.
//!
//! Per §4.6: two coordination layers guard execution. This struct is the
//! repository-side half (`nextQuick`/`nextFull`, updated *before* the work
//! starts so a crash does not cause an immediate re-run); the local OS
//! advisory lock on the config file is the other half, implemented by
//! `pvault_tools::process_locker`.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MaintenanceSchedule {
    /// `user@host` identity allowed to run maintenance on this repository.
    pub owner: String,
    pub quick_interval_seconds: i64,
    pub full_interval_seconds: i64,
    pub next_quick: Option<i64>,
    pub next_full: Option<i64>,
}

impl MaintenanceSchedule {
    pub fn new(owner: impl Into<String>, quick_interval_seconds: i64, full_interval_seconds: i64) -> Self {
        Self {
            owner: owner.into(),
            quick_interval_seconds,
            full_interval_seconds,
            next_quick: None,
            next_full: None,
        }
    }

    pub fn is_owned_by(&self, caller_id: &str) -> bool {
        self.owner == caller_id
    }

    pub fn quick_due(&self, now: i64) -> bool {
        self.next_quick.map(|t| now >= t).unwrap_or(true)
    }

    pub fn full_due(&self, now: i64) -> bool {
        self.next_full.map(|t| now >= t).unwrap_or(true)
    }

    /// Reschedule both cycles relative to `now`, called *before* a cycle's
    /// work begins so a crash mid-cycle doesn't cause an immediate retry.
    pub fn mark_quick_started(&mut self, now: i64) {
        self.next_quick = Some(now + self.quick_interval_seconds);
    }

    pub fn mark_full_started(&mut self, now: i64) {
        self.next_full = Some(now + self.full_interval_seconds);
        // A full cycle includes a quick cycle (§4.6).
        self.next_quick = Some(now + self.quick_interval_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_run_schedule_is_always_due() {
        let sched = MaintenanceSchedule::new("root@host", 3600, 86400);
        assert!(sched.quick_due(0));
        assert!(sched.full_due(0));
    }

    #[test]
    fn marking_started_pushes_next_due_time_forward() {
        let mut sched = MaintenanceSchedule::new("root@host", 3600, 86400);
        sched.mark_quick_started(1_000);
        assert!(!sched.quick_due(1_000));
        assert!(sched.quick_due(1_000 + 3600));
    }

    #[test]
    fn full_cycle_also_reschedules_quick() {
        let mut sched = MaintenanceSchedule::new("root@host", 3600, 86400);
        sched.mark_full_started(1_000);
        assert_eq!(sched.next_quick, Some(1_000 + 3600));
        assert_eq!(sched.next_full, Some(1_000 + 86400));
    }

    #[test]
    fn ownership_check() {
        let sched = MaintenanceSchedule::new("root@host", 3600, 86400);
        assert!(sched.is_owned_by("root@host"));
        assert!(!sched.is_owned_by("other@host"));
    }
}
