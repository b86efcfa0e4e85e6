// Storage backend interface
//
// A backend persists canonical packed bytes keyed by digest. Because keys
// are content-derived, `commit` is idempotent and existing entries are
// never rewritten; readers need no coordination with writers.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::digest::Digest;
use crate::error::StorageError;

/// Persists packed resources by digest.
///
/// The async variants default to the synchronous implementation so purely
/// in-process backends need not implement them.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store packed bytes under their digest. Storing an already-present
    /// digest is a no-op.
    fn commit(&self, digest: &Digest, bytes: &[u8]) -> Result<(), StorageError>;

    /// Whether the backend holds the digest.
    fn has(&self, digest: &Digest) -> Result<bool, StorageError>;

    /// The packed bytes for a digest, or `None` if not locally available.
    fn get(&self, digest: &Digest) -> Result<Option<Vec<u8>>, StorageError>;

    async fn commit_async(&self, digest: &Digest, bytes: &[u8]) -> Result<(), StorageError> {
        self.commit(digest, bytes)
    }

    async fn has_async(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.has(digest)
    }

    async fn get_async(&self, digest: &Digest) -> Result<Option<Vec<u8>>, StorageError> {
        self.get(digest)
    }
}

/// Configuration for the filesystem backend.
#[derive(Clone, Debug)]
pub struct FileBackendConfig {
    /// Root directory of the object tree.
    pub root: PathBuf,
    /// Whether to fsync object files before the final rename.
    pub fsync: bool,
}

impl FileBackendConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fsync: false,
        }
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }
}
