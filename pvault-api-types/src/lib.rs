//! Value types and the error taxonomy shared across the pvault crate family.
//!
//! Kept deliberately small: this crate is the one dependency every other
//! pvault crate can take without pulling in blob-store, codec, or config
//! logic, mirroring how a thin `*-api-types` crate sits at the bottom of a
//! layered workspace.

mod error;
mod fingerprint;
mod human_byte;
mod kdf;

pub use error::{CoreError, ErrorKind};
pub use fingerprint::Fingerprint;
pub use human_byte::HumanByte;
pub use kdf::{Kdf, KeyInfo};

/// Whether content is authenticated-encrypted, signed-only, or left alone.
///
/// `SignOnly` is accepted as a valid format-blob value but is not otherwise
/// distinguished by the blob codec, which always authenticates; it exists so
/// a repository format blob written by a differently-configured peer can
/// still be parsed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CryptMode {
    None,
    Encrypt,
    SignOnly,
}

impl Default for CryptMode {
    fn default() -> Self {
        CryptMode::Encrypt
    }
}

/// Object-lock / retention policy requested of a `BlobStore::Put`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionMode {
    None,
    Governance,
    Compliance,
}

impl Default for RetentionMode {
    fn default() -> Self {
        RetentionMode::None
    }
}

/// Accumulated result of a garbage-collection or compaction run.
///
/// Mirrors the running-summary convention this design's ancestor uses for
/// its own GC status struct: cheap counters updated as the run progresses,
/// plus a point at which the whole thing can be `Debug`-printed for a log
/// line or persisted as the final run record.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct GarbageCollectionStatus {
    pub upid: Option<String>,
    pub index_data_bytes: u64,
    pub index_meta_bytes: u64,
    pub index_garbage_bytes: u64,
    pub still_bad: usize,
    pub removed_bad: usize,
    pub removed_chunks: usize,
    pub removed_bytes: u64,
    pub pending_chunks: usize,
    pub pending_bytes: u64,
    pub disk_bytes: u64,
    pub disk_chunks: usize,
}
