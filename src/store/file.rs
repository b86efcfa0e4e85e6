// Filesystem storage backend
//
// Objects live at `root/<first 2 hex chars>/<remaining 62 hex chars>`; the
// directory tree is the whole index. Writes go to a temp file in the same
// directory and are published with an atomic rename, so readers only ever
// observe complete objects and concurrent writers of the same digest
// harmlessly race to an identical result.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use tracing::trace;

use crate::digest::Digest;
use crate::error::StorageError;
use crate::pack;
use crate::store::backend::{FileBackendConfig, StorageBackend};

/// A backend that stores one file per digest under a prefix tree.
pub struct FileBackend {
    config: FileBackendConfig,
}

impl FileBackend {
    /// Open (creating if needed) an object tree at the configured root.
    pub fn new(config: FileBackendConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.root)?;
        Ok(Self { config })
    }

    /// Open with default configuration at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::new(FileBackendConfig::new(root))
    }

    fn object_path(&self, digest: &Digest) -> (PathBuf, String) {
        let hex = digest.to_hex();
        let dir = self.config.root.join(&hex[..2]);
        (dir, hex[2..].to_string())
    }
}

#[async_trait::async_trait]
impl StorageBackend for FileBackend {
    fn commit(&self, digest: &Digest, bytes: &[u8]) -> Result<(), StorageError> {
        let (dir, name) = self.object_path(digest);
        let path = dir.join(&name);
        if path.exists() {
            return Ok(());
        }
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!(".{}.tmp.{}", name, std::process::id()));
        let mut file = File::create(&tmp)?;
        file.write_all(&pack::frame(bytes))?;
        if self.config.fsync {
            file.sync_all()?;
        }
        drop(file);
        fs::rename(&tmp, &path)?;
        trace!(digest = %digest, "stored object file");
        Ok(())
    }

    fn has(&self, digest: &Digest) -> Result<bool, StorageError> {
        let (dir, name) = self.object_path(digest);
        Ok(dir.join(name).exists())
    }

    fn get(&self, digest: &Digest) -> Result<Option<Vec<u8>>, StorageError> {
        let (dir, name) = self.object_path(digest);
        let path = dir.join(name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let body = pack::unframe(&data)
            .map_err(|err| StorageError::Corrupt(format!("{}: {}", path.display(), err)))?;
        Ok(Some(body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let digest = Digest::of(b"object body");
        backend.commit(&digest, b"object body").unwrap();
        assert!(backend.has(&digest).unwrap());
        assert_eq!(backend.get(&digest).unwrap().unwrap(), b"object body");
    }

    #[test]
    fn uses_two_char_prefix_directories() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let digest = Digest::of(b"prefixed");
        backend.commit(&digest, b"prefixed").unwrap();

        let hex = digest.to_hex();
        let object = dir.path().join(&hex[..2]).join(&hex[2..]);
        assert!(object.is_file());
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let digest = Digest::of(b"tidy");
        backend.commit(&digest, b"tidy").unwrap();
        backend.commit(&digest, b"tidy").unwrap();

        for entry in walk(dir.path()) {
            assert!(
                !entry.file_name().unwrap().to_string_lossy().contains(".tmp."),
                "leftover temp file: {:?}",
                entry
            );
        }
    }

    #[test]
    fn corrupt_objects_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let digest = Digest::of(b"mangled");
        backend.commit(&digest, b"mangled").unwrap();

        let hex = digest.to_hex();
        let path = dir.path().join(&hex[..2]).join(&hex[2..]);
        fs::write(&path, b"not a framed object").unwrap();
        assert!(matches!(
            backend.get(&digest),
            Err(StorageError::Corrupt(_))
        ));
    }

    fn walk(root: &std::path::Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files
    }
}
