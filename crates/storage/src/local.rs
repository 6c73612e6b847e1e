//! Local filesystem storage

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{Result, StorageError};
use crate::pool::BufferPool;
use crate::Storage;

/// Storage over files on the local filesystem
///
/// Paths are resolved relative to an optional root directory. Every read
/// opens its own file handle, so concurrent readers never share a cursor.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage {
    root: Option<PathBuf>,
    pool: Option<Arc<dyn BufferPool>>,
}

impl LocalStorage {
    /// Storage resolving paths as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage resolving relative paths under `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            pool: None,
        }
    }

    /// Offer `pool` to zero-copy readers
    pub fn with_buffer_pool(mut self, pool: Arc<dyn BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path),
            None => Path::new(path).to_path_buf(),
        }
    }

    fn open(&self, path: &str) -> Result<File> {
        File::open(self.resolve(path)).map_err(|e| StorageError::io(path, e))
    }
}

impl Storage for LocalStorage {
    fn len(&self, path: &str) -> Result<u64> {
        let file = self.open(path)?;
        let metadata = file.metadata().map_err(|e| StorageError::io(path, e))?;
        Ok(metadata.len())
    }

    fn read_range(&self, path: &str, offset: u64, length: usize) -> Result<Bytes> {
        let mut buf = vec![0; length];
        self.read_range_into(path, offset, &mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn read_range_into(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<()> {
        trace!(path, offset, length = buf.len(), "local read");
        let mut file = self.open(path)?;
        let file_length = file.metadata().map_err(|e| StorageError::io(path, e))?.len();
        let in_bounds = offset
            .checked_add(buf.len() as u64)
            .is_some_and(|end| end <= file_length);
        if !in_bounds {
            return Err(StorageError::UnexpectedEof {
                path: path.to_string(),
                offset,
                length: buf.len(),
                file_length,
            });
        }

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::io(path, e))?;
        file.read_exact(buf).map_err(|e| StorageError::io(path, e))?;
        Ok(())
    }

    fn buffer_pool(&self) -> Option<Arc<dyn BufferPool>> {
        self.pool.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_range_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("data.bin")).unwrap();
        file.write_all(b"0123456789").unwrap();

        let storage = LocalStorage::with_root(dir.path());
        assert_eq!(storage.len("data.bin").unwrap(), 10);
        assert_eq!(storage.read_range("data.bin", 3, 4).unwrap(), Bytes::from_static(b"3456"));
    }

    #[test]
    fn test_read_past_end_is_eof() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("short.bin"), b"abc").unwrap();

        let storage = LocalStorage::with_root(dir.path());
        let err = storage.read_range("short.bin", 2, 5).unwrap_err();
        assert!(matches!(err, StorageError::UnexpectedEof { file_length: 3, .. }));
        assert!(err.is_missing_data());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::with_root(dir.path());
        assert!(matches!(storage.len("nope.bin"), Err(StorageError::NotFound(_))));
    }
}
