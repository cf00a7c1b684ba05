//! Deduplicating, encrypted, snapshot-oriented backup repository engine.
//!
//! Layered bottom-up: [`pvault_store`] owns content-addressed storage (the
//! blob store boundary, chunking, the blob codec, and the pack/index
//! subsystem). This crate builds the Object Manager, Manifest Store,
//! maintenance scheduler and GC, and the upgrade-lock orchestration on top,
//! and exposes [`repository::Repository`] as the one entry point a caller
//! needs.

pub mod maintenance;
pub mod manifest;
pub mod object;
pub mod repository;
pub mod upgrade;

pub use pvault_api_types::{CoreError, ErrorKind};
pub use repository::Repository;
