//! Exports configuration data from the build system and filesystem layout constants.

pub const PVAULT_PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
);
pub const PVAULT_PKG_RELEASE: &str = env!("CARGO_PKG_VERSION_PATCH");

#[macro_export]
macro_rules! PVAULT_CACHE_DIR_M {
    () => {
        "/var/cache/pvault"
    };
}

#[macro_export]
macro_rules! PVAULT_STATE_DIR_M {
    () => {
        "/var/lib/pvault"
    };
}

/// namespaced directory for the local client-side read cache
pub const PVAULT_CACHE_DIR: &str = PVAULT_CACHE_DIR_M!();

/// namespaced directory for persistent local client state (locks, schedules)
pub const PVAULT_STATE_DIR: &str = PVAULT_STATE_DIR_M!();

/// Well-known blob name for the repository format blob.
pub const FORMAT_BLOB_NAME: &str = "kopia.repository";

/// Well-known blob name for the optional retention blob.
pub const RETENTION_BLOB_NAME: &str = "kopia.retention";

/// Default target size for a pack blob before it is sealed and uploaded.
pub const DEFAULT_MAX_PACK_SIZE: u64 = 20 * 1024 * 1024;

/// Default content-defined-chunking parameters (§4.2 of the design: fixed at
/// repository-creation time and never changed afterwards for a given repository).
pub const DEFAULT_CHUNKER_MIN_SIZE: usize = 16 * 1024;
pub const DEFAULT_CHUNKER_AVG_SIZE: usize = 64 * 1024;
pub const DEFAULT_CHUNKER_MAX_SIZE: usize = 4 * 1024 * 1024;

/// Conservative gap required between two successful GC mark phases before the
/// earlier one's tombstones may be physically dropped.
pub const DEFAULT_GC_SAFETY_MARGIN_SECONDS: i64 = 4 * 3600;
/// Extra safety margin subtracted from the older mark's end time before computing
/// the drop-phase cutoff.
pub const DEFAULT_GC_EXTRA_SAFETY_MARGIN_SECONDS: i64 = 3600;

/// How long a pack drained by short-pack rewrite must sit unreferenced before
/// its blob is physically deleted.
pub const DEFAULT_UNREFERENCED_BLOB_SAFETY_SECONDS: i64 = 24 * 3600;

/// Prepend the local state directory to a file name.
#[macro_export]
macro_rules! statedir {
    ($subdir:expr) => {
        concat!($crate::PVAULT_STATE_DIR_M!(), $subdir)
    };
}
