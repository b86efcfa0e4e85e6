// In-memory storage backend

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::digest::Digest;
use crate::error::StorageError;
use crate::store::backend::StorageBackend;

/// A backend that keeps packed resources in a process-local map.
#[derive(Default)]
pub struct InMemoryBackend {
    objects: RwLock<HashMap<Digest, Arc<Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().unwrap().is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for InMemoryBackend {
    fn commit(&self, digest: &Digest, bytes: &[u8]) -> Result<(), StorageError> {
        let mut objects = self.objects.write().unwrap();
        // Entries are immutable once present.
        objects
            .entry(*digest)
            .or_insert_with(|| Arc::new(bytes.to_vec()));
        Ok(())
    }

    fn has(&self, digest: &Digest) -> Result<bool, StorageError> {
        Ok(self.objects.read().unwrap().contains_key(digest))
    }

    fn get(&self, digest: &Digest) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .objects
            .read()
            .unwrap()
            .get(digest)
            .map(|bytes| bytes.as_ref().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_is_idempotent() {
        let backend = InMemoryBackend::new();
        let digest = Digest::of(b"payload");
        backend.commit(&digest, b"payload").unwrap();
        backend.commit(&digest, b"payload").unwrap();
        assert_eq!(backend.len(), 1);
        assert!(backend.has(&digest).unwrap());
        assert_eq!(backend.get(&digest).unwrap().unwrap(), b"payload");
    }

    #[test]
    fn missing_digest_is_none() {
        let backend = InMemoryBackend::new();
        assert!(!backend.has(&Digest::of(b"nope")).unwrap());
        assert_eq!(backend.get(&Digest::of(b"nope")).unwrap(), None);
    }
}
