//! Persistence: one directory per world, settings seeded on open, integrity
//! checked against the level metadata.
//!
//! # Invariants
//! - Opening never rewrites settings that are already on disk.
//! - Settings on disk always match the checksum recorded in the metadata.
//! - A closed store rejects every further operation.

mod provider;
mod store;

pub use provider::{Compression, Provider, WorldDb};
pub use store::{DiskDb, DiskProvider, LevelMeta, StoreError};
