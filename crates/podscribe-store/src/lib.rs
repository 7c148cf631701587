//! Object Store Adapter (component A): list, head, get, put of opaque keys
//! against an S3-compatible bucket, with bounded retry for transient
//! failures.

mod memory;
mod retry;
mod s3;

pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use podscribe_core::StoreError;
use std::path::Path;

/// Synchronous-from-the-caller's-view operations over an opaque object
/// store. `list` is paginated internally and returns a fully materialized,
/// finite sequence of keys — restartable only by calling again, per spec.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StoreError>;

    /// Maps "not found" to `Ok(false)`; every other error is fatal for this
    /// call and returned as `Err`.
    async fn head(&self, key: &str) -> Result<bool, StoreError>;

    /// Downloads `key` to `local_path` using a `.part`-then-rename write so
    /// readers never observe a half-written file.
    async fn get(&self, key: &str, local_path: &Path) -> Result<(), StoreError>;

    /// Uploads `local_path` to `key` in a single call.
    async fn put(&self, key: &str, local_path: &Path) -> Result<(), StoreError>;
}
