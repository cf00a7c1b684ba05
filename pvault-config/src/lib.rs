//! Repository-format, local-client and lock-record configuration types.
//!
//! These are the ambient, on-disk/on-blob records every other pvault crate
//! reads at session-open time: the repository format blob (immutable
//! parameters negotiated once, at repository creation), the local client
//! config (per-client cache and maintenance-owner settings, never uploaded),
//! the optional retention record, the upgrade-lock state machine, the
//! maintenance schedule record, and local encrypted key records.

mod key_record;
mod local_config;
mod maintenance_schedule;
mod repository_format;
mod retention;
mod upgrade_lock;

pub use key_record::{KeyDerivation, KeyRecord};
pub use local_config::LocalConfig;
pub use maintenance_schedule::MaintenanceSchedule;
pub use repository_format::{ChunkerParams, RepositoryFormat};
pub use retention::RetentionConfig;
pub use upgrade_lock::{UpgradeLock, UpgradePhase};
