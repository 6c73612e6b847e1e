//! In-memory storage, used by tests and tools that build files on the fly

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use crate::error::{Result, StorageError};
use crate::pool::BufferPool;
use crate::Storage;

/// Storage backed by a map of path to bytes
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Bytes>>,
    pool: Option<Arc<dyn BufferPool>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `pool` to zero-copy readers
    pub fn with_buffer_pool(mut self, pool: Arc<dyn BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Store `data` under `path`, replacing any previous contents
    pub fn put(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.files
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.into(), data.into());
    }

    /// Current contents of `path`
    pub fn get(&self, path: &str) -> Result<Bytes> {
        self.files
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

impl Storage for MemoryStorage {
    fn len(&self, path: &str) -> Result<u64> {
        Ok(self.get(path)?.len() as u64)
    }

    fn read_range(&self, path: &str, offset: u64, length: usize) -> Result<Bytes> {
        let data = self.get(path)?;
        let file_length = data.len() as u64;
        let eof = || StorageError::UnexpectedEof {
            path: path.to_string(),
            offset,
            length,
            file_length,
        };

        let start = usize::try_from(offset).map_err(|_| eof())?;
        let end = start.checked_add(length).ok_or_else(eof)?;
        if end > data.len() {
            return Err(eof());
        }
        Ok(data.slice(start..end))
    }

    fn buffer_pool(&self) -> Option<Arc<dyn BufferPool>> {
        self.pool.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ElasticBufferPool;

    #[test]
    fn test_put_and_read() {
        let storage = MemoryStorage::new();
        storage.put("a", Bytes::from_static(b"hello world"));
        assert_eq!(storage.len("a").unwrap(), 11);
        assert_eq!(storage.read_range("a", 6, 5).unwrap(), Bytes::from_static(b"world"));

        let mut buf = [0u8; 5];
        storage.read_range_into("a", 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_out_of_range() {
        let storage = MemoryStorage::new();
        storage.put("a", Bytes::from_static(b"xyz"));
        assert!(storage.read_range("a", 1, 3).unwrap_err().is_missing_data());
        assert!(storage.read_range("a", u64::MAX, 1).unwrap_err().is_missing_data());
        assert!(matches!(storage.len("b"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_buffer_pool_is_optional() {
        assert!(MemoryStorage::new().buffer_pool().is_none());
        let storage = MemoryStorage::new().with_buffer_pool(Arc::new(ElasticBufferPool::new()));
        assert!(storage.buffer_pool().is_some());
    }
}
