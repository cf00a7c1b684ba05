//! The repository format blob: the small, well-known-named blob at the
//! repository root (`kopia.repository`, see `pvault_buildcfg::FORMAT_BLOB_NAME`)
//! that every session reads before doing anything else.

use serde::{Deserialize, Serialize};

use pvault_api_types::{CoreError, ErrorKind};

use crate::upgrade_lock::UpgradeLock;

/// Content-defined-chunking shape, fixed at repository-creation time.
///
/// §9 open question: the chunker's rolling-hash parameters are not part of
/// the distilled spec and must be recovered from the format blob at read
/// time; this struct is that recovery point. Once a repository is created
/// these values are immutable -- changing them would change every
/// subsequently-computed ContentID boundary, breaking dedup against
/// existing packs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ChunkerParams {
    pub min_size: usize,
    pub avg_size: usize,
    pub max_size: usize,
}

impl ChunkerParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.avg_size.count_ones() != 1 {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!("chunker avg_size {} is not a power of two", self.avg_size),
            ));
        }
        if !(self.min_size < self.avg_size && self.avg_size < self.max_size) {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "chunker min_size < avg_size < max_size must hold",
            ));
        }
        Ok(())
    }
}

impl Default for ChunkerParams {
    fn default() -> Self {
        Self {
            min_size: pvault_buildcfg::DEFAULT_CHUNKER_MIN_SIZE,
            avg_size: pvault_buildcfg::DEFAULT_CHUNKER_AVG_SIZE,
            max_size: pvault_buildcfg::DEFAULT_CHUNKER_MAX_SIZE,
        }
    }
}

/// Repository-wide format parameters, some immutable for the life of the
/// repository, some mutable by a maintenance owner.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RepositoryFormat {
    pub format_version: u32,
    pub encryption_algorithm: String,
    pub hash_algorithm: String,
    pub chunker: ChunkerParams,
    pub max_pack_size: u64,
    pub index_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_lock: Option<UpgradeLock>,
}

impl RepositoryFormat {
    pub fn new(chunker: ChunkerParams) -> Self {
        Self {
            format_version: 1,
            encryption_algorithm: "AES256-GCM-HMAC-SHA256".to_string(),
            hash_algorithm: "HMAC-SHA256".to_string(),
            chunker,
            max_pack_size: pvault_buildcfg::DEFAULT_MAX_PACK_SIZE,
            index_version: 1,
            upgrade_lock: None,
        }
    }

    /// Reject a session's locally-recorded immutable parameters if they
    /// disagree with what is stored in this format blob. A previous session
    /// negotiated these once at repository creation; they cannot drift.
    pub fn check_immutable_params_match(&self, other: &RepositoryFormat) -> Result<(), CoreError> {
        if self.chunker != other.chunker {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "chunker parameters differ from the repository's recorded format",
            ));
        }
        if self.encryption_algorithm != other.encryption_algorithm
            || self.hash_algorithm != other.hash_algorithm
        {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "encryption/hash algorithm differs from the repository's recorded format",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunker_params_validate() {
        assert!(ChunkerParams::default().validate().is_ok());
    }

    #[test]
    fn non_power_of_two_avg_is_rejected() {
        let params = ChunkerParams {
            min_size: 1000,
            avg_size: 3000,
            max_size: 9000,
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn json_round_trip_preserves_upgrade_lock_absence() {
        let fmt = RepositoryFormat::new(ChunkerParams::default());
        let json = serde_json::to_string(&fmt).unwrap();
        assert!(!json.contains("upgrade_lock"));
        let back: RepositoryFormat = serde_json::from_str(&json).unwrap();
        assert!(back.upgrade_lock.is_none());
    }

    #[test]
    fn immutable_param_drift_is_rejected() {
        let a = RepositoryFormat::new(ChunkerParams::default());
        let mut b = a.clone();
        b.chunker.avg_size = 128 * 1024;
        assert!(a.check_immutable_params_match(&b).is_err());
    }
}
