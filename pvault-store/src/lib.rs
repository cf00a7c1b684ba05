//! Content-addressed storage engine: chunking, dedup, the pack/index
//! subsystem, and the content manager that ties them together (§3, §4.1-4.3).
//!
//! This crate is the storage-backend-independent core: it never touches a
//! filesystem or network socket directly, only the [`blob_store::BlobStore`]
//! contract. Everything here is synchronous; callers needing async I/O wrap
//! these calls (e.g. with `tokio::task::spawn_blocking`).

pub mod blob_store;
pub mod chunker;
pub mod codec;
pub mod content;
pub mod content_manager;
pub mod index;

pub use blob_store::{BlobEntry, BlobMetadata, BlobStore, InMemoryBlobStore, PutOptions};
pub use chunker::Chunker;
pub use content::content_id::ContentId;
pub use content::info::ContentInfo;
pub use content::pack::PackClass;
pub use content_manager::{ContentFilter, ContentManager, UpgradeGate};
pub use index::manager::{CompactionOptions, IndexManager};
