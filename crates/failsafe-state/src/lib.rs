//! Failsafe-State: Snapshot persistence for fail-safe contexts
//!
//! This crate provides the persistence layer for fail-safe contexts. It owns
//! the stored shape of a snapshot and the contract every storage backend must
//! honour, plus the stock backends.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: durability of the failure snapshot and exact key addressing.
//!
//! ## Key Components
//!
//! - `StorageBackend`: exists / load / save / clear / list keyed by `SnapshotKey`
//! - `Snapshot`: attachment values captured at failure time
//! - `LocalStorage`: one JSON file per key in a directory
//! - `MirroredStorage`: fans writes out to several backends

mod error;
pub mod fakes;
pub mod local;
pub mod mirrored;
pub mod storage_traits;

pub use error::StorageError;
pub use local::LocalStorage;
pub use mirrored::MirroredStorage;
pub use storage_traits::{
    is_valid_label, EncodedValue, Snapshot, SnapshotKey, StorageBackend, StorageResult,
    FINGERPRINT_LEN, MAX_LABEL_LEN,
};
