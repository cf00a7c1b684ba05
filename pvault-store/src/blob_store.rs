//! The one boundary the core depends on (§6): opaque put/get/list/delete of
//! named blobs on an untrusted object store. Concrete provider adapters
//! (S3, Azure, GCS, WebDAV, local filesystem) are out of scope (§1); this
//! module defines the contract and an in-memory implementation used by
//! every test in this crate.

use std::collections::HashMap;
use std::sync::Mutex;

use pvault_api_types::{CoreError, ErrorKind, RetentionMode};

/// Object-lock / retention options requested of a `Put`.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub retention_mode: RetentionMode,
    pub retention_period_seconds: i64,
    /// Fail rather than overwrite if the blob already exists.
    pub do_not_recreate: bool,
    pub set_mod_time: Option<i64>,
}

#[derive(Clone, Copy, Debug)]
pub struct BlobMetadata {
    pub length: u64,
    pub timestamp: i64,
}

/// One entry delivered to a `List` callback.
#[derive(Clone, Debug)]
pub struct BlobEntry {
    pub id: String,
    pub length: u64,
    pub timestamp: i64,
}

/// Uniform contract every blob-store provider adapter implements.
///
/// `List` is unordered and at-least-once: callers must tolerate duplicate
/// callback invocations for the same id.
pub trait BlobStore: Send + Sync {
    fn get(&self, id: &str, offset: u64, length: u64) -> Result<Vec<u8>, CoreError>;
    fn get_metadata(&self, id: &str) -> Result<BlobMetadata, CoreError>;
    fn put(&self, id: &str, bytes: &[u8], options: &PutOptions) -> Result<(), CoreError>;
    fn delete(&self, id: &str) -> Result<(), CoreError>;
    fn list(&self, prefix: &str, cb: &mut dyn FnMut(BlobEntry)) -> Result<(), CoreError>;

    /// Optional: extend the retention period of an already-written blob.
    /// Providers lacking support return `Unsupported`.
    fn extend_retention(
        &self,
        _id: &str,
        _mode: RetentionMode,
        _period_seconds: i64,
    ) -> Result<(), CoreError> {
        Err(CoreError::new(
            ErrorKind::Unsupported,
            "provider does not support ExtendRetention",
        ))
    }
}

struct StoredBlob {
    bytes: Vec<u8>,
    timestamp: i64,
    locked_until: Option<i64>,
}

/// In-memory `BlobStore`, backed by a `Mutex<HashMap>`. Never touches the
/// filesystem; this is the storage-backend-independent test double every
/// unit and integration test in this crate family exercises against.
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, StoredBlob>>,
    clock: Mutex<i64>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            clock: Mutex::new(0),
        }
    }

    /// Advance the injected clock used to stamp new/updated blobs.
    pub fn set_clock(&self, now: i64) {
        *self.clock.lock().unwrap() = now;
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(id)
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn get(&self, id: &str, offset: u64, length: u64) -> Result<Vec<u8>, CoreError> {
        let blobs = self.blobs.lock().unwrap();
        let blob = blobs.get(id).ok_or_else(|| {
            CoreError::new(ErrorKind::NotFound, format!("blob '{id}' not found"))
        })?;
        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .ok_or_else(|| CoreError::new(ErrorKind::InvalidRange, "range overflow"))?;
        if end > blob.bytes.len() {
            return Err(CoreError::new(
                ErrorKind::InvalidRange,
                format!(
                    "range [{start}, {end}) out of bounds for blob '{id}' of length {}",
                    blob.bytes.len()
                ),
            ));
        }
        Ok(blob.bytes[start..end].to_vec())
    }

    fn get_metadata(&self, id: &str) -> Result<BlobMetadata, CoreError> {
        let blobs = self.blobs.lock().unwrap();
        let blob = blobs.get(id).ok_or_else(|| {
            CoreError::new(ErrorKind::NotFound, format!("blob '{id}' not found"))
        })?;
        Ok(BlobMetadata {
            length: blob.bytes.len() as u64,
            timestamp: blob.timestamp,
        })
    }

    fn put(&self, id: &str, bytes: &[u8], options: &PutOptions) -> Result<(), CoreError> {
        let mut blobs = self.blobs.lock().unwrap();
        let now = *self.clock.lock().unwrap();

        if let Some(existing) = blobs.get(id) {
            if let Some(locked_until) = existing.locked_until {
                if now < locked_until {
                    return Err(CoreError::new(
                        ErrorKind::ImmutableDueToPolicy,
                        format!("blob '{id}' is under retention until {locked_until}"),
                    ));
                }
            }
            if options.do_not_recreate {
                return Err(CoreError::new(
                    ErrorKind::InvalidArgument,
                    format!("blob '{id}' already exists and do_not_recreate was set"),
                ));
            }
        }

        let locked_until = match options.retention_mode {
            RetentionMode::None => None,
            RetentionMode::Governance | RetentionMode::Compliance => {
                Some(now + options.retention_period_seconds)
            }
        };

        blobs.insert(
            id.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                timestamp: options.set_mod_time.unwrap_or(now),
                locked_until,
            },
        );
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), CoreError> {
        let mut blobs = self.blobs.lock().unwrap();
        let now = *self.clock.lock().unwrap();
        match blobs.get(id) {
            None => Err(CoreError::new(
                ErrorKind::NotFound,
                format!("blob '{id}' not found"),
            )),
            Some(blob) if blob.locked_until.map(|t| now < t).unwrap_or(false) => {
                Err(CoreError::new(
                    ErrorKind::ImmutableDueToPolicy,
                    format!("blob '{id}' is under retention"),
                ))
            }
            Some(_) => {
                blobs.remove(id);
                Ok(())
            }
        }
    }

    fn list(&self, prefix: &str, cb: &mut dyn FnMut(BlobEntry)) -> Result<(), CoreError> {
        let blobs = self.blobs.lock().unwrap();
        for (id, blob) in blobs.iter() {
            if id.starts_with(prefix) {
                cb(BlobEntry {
                    id: id.clone(),
                    length: blob.bytes.len() as u64,
                    timestamp: blob.timestamp,
                });
            }
        }
        Ok(())
    }

    fn extend_retention(
        &self,
        id: &str,
        mode: RetentionMode,
        period_seconds: i64,
    ) -> Result<(), CoreError> {
        let mut blobs = self.blobs.lock().unwrap();
        let now = *self.clock.lock().unwrap();
        let blob = blobs.get_mut(id).ok_or_else(|| {
            CoreError::new(ErrorKind::NotFound, format!("blob '{id}' not found"))
        })?;
        if matches!(mode, RetentionMode::None) {
            return Ok(());
        }
        let candidate = now + period_seconds;
        blob.locked_until = Some(blob.locked_until.map_or(candidate, |cur| cur.max(candidate)));
        Ok(())
    }
}
