//! Blocking byte-range I/O for stripe files.
//!
//! The reader engine only ever talks to a [`Storage`]: it asks for a file's
//! length and for byte ranges inside it. Implementations decide where the
//! bytes come from. A storage may also hand out a [`BufferPool`] so that
//! readers can reuse large buffers across stripes instead of allocating
//! fresh ones.

pub mod error;
pub mod local;
pub mod memory;
pub mod object_store;
pub mod pool;

pub use error::{Result, StorageError};
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use object_store::{create_object_store, ObjectStoreStorage};
pub use pool::{BufferPool, ElasticBufferPool};

use bytes::Bytes;
use std::fmt::Debug;
use std::sync::Arc;

/// Byte-range access to files
///
/// Every call blocks the calling thread until the bytes are available.
/// Implementations must be safe to share between threads; each record reader
/// issues its own reads.
pub trait Storage: Debug + Send + Sync {
    /// Total length of the file in bytes
    fn len(&self, path: &str) -> Result<u64>;

    /// Read exactly `length` bytes starting at `offset`
    ///
    /// Fails with [`StorageError::UnexpectedEof`] when the file ends first.
    fn read_range(&self, path: &str, offset: u64, length: usize) -> Result<Bytes>;

    /// Read `buf.len()` bytes starting at `offset` into a caller-owned buffer
    fn read_range_into(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.read_range(path, offset, buf.len())?;
        buf.copy_from_slice(&bytes);
        Ok(())
    }

    /// Pool that zero-copy readers may borrow buffers from, if this storage offers one
    fn buffer_pool(&self) -> Option<Arc<dyn BufferPool>> {
        None
    }
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn len(&self, path: &str) -> Result<u64> {
        (**self).len(path)
    }

    fn read_range(&self, path: &str, offset: u64, length: usize) -> Result<Bytes> {
        (**self).read_range(path, offset, length)
    }

    fn read_range_into(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_range_into(path, offset, buf)
    }

    fn buffer_pool(&self) -> Option<Arc<dyn BufferPool>> {
        (**self).buffer_pool()
    }
}
