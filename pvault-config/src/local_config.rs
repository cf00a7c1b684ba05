//! `repository.config`: the per-client record of how to attach to a
//! repository. Never uploaded; distinct from the repository format blob,
//! which is shared and governs dedup/encryption for every client.

use serde::{Deserialize, Serialize};

/// Per-client connection, caching and maintenance-identity settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LocalConfig {
    /// Local cache directory root, normally `pvault_buildcfg::PVAULT_CACHE_DIR`.
    pub cache_dir: String,
    /// `user@host` identity this client presents when attempting to run
    /// maintenance; compared against the maintenance schedule's `owner`.
    pub owner_id: String,
    /// Upper bound on concurrent hashing/upload worker tasks.
    pub upload_concurrency: usize,
    /// Byte budget for the read-through content cache (§4.2).
    pub read_cache_bytes: u64,
    /// Whether this client may perform writes at all (operator-set,
    /// independent of the upgrade lock's `RepositoryReadOnly` semantics).
    pub read_only: bool,
}

impl LocalConfig {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            cache_dir: pvault_buildcfg::PVAULT_CACHE_DIR.to_string(),
            owner_id: owner_id.into(),
            upload_concurrency: 4,
            read_cache_bytes: 512 * 1024 * 1024,
            read_only: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_defaults_to_writable() {
        let cfg = LocalConfig::new("root@pvault-host");
        assert!(!cfg.read_only);
        assert_eq!(cfg.owner_id, "root@pvault-host");
    }
}
