//! Fetching column chunks of one stripe
//!
//! The loader reads the chunks of the included columns for the planned row
//! groups, merging chunks that sit next to each other in the file into a
//! single read. With zero-copy enabled and a pool available, reads land in
//! pooled buffers. Uncompressed chunks are decoded straight from those
//! buffers, which go back to the pool when the [`LoadedStripe`] is dropped,
//! whichever way the reader leaves the stripe. Compressed reads return their
//! buffer as soon as the chunks are decompressed.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use storage::{BufferPool, Storage};
use tracing::debug;

use crate::codec::Codec;
use crate::error::{Result, StripeFileError};
use crate::footer::Footer;
use crate::metadata::StripeMetadata;

/// Read a byte range of stripe `stripe`, reporting missing bytes as a corrupt stripe
pub(crate) fn read_stripe_range(
    storage: &dyn Storage,
    footer: &Footer,
    stripe: usize,
    offset: u64,
    length: usize,
) -> Result<Bytes> {
    storage
        .read_range(footer.path(), offset, length)
        .map_err(|e| missing_as_corrupt(e, footer, stripe))
}

fn missing_as_corrupt(e: storage::StorageError, footer: &Footer, stripe: usize) -> StripeFileError {
    if e.is_missing_data() {
        StripeFileError::corrupt_stripe(footer.path(), stripe, e.to_string())
    } else {
        e.into()
    }
}

/// A buffer borrowed from a [`BufferPool`], returned when dropped
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<dyn BufferPool>,
}

impl PooledBuffer {
    pub fn acquire(pool: Arc<dyn BufferPool>, length: usize) -> Self {
        let buffer = pool.acquire(false, length);
        Self { buffer, pool }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

/// Bytes backing one or more chunks
#[derive(Debug)]
enum Segment {
    Heap(Bytes),
    Pooled(PooledBuffer),
}

impl Segment {
    fn as_slice(&self) -> &[u8] {
        match self {
            Segment::Heap(bytes) => bytes.as_ref(),
            Segment::Pooled(buffer) => buffer.as_slice(),
        }
    }
}

#[derive(Debug, Clone)]
struct ChunkRef {
    segment: usize,
    range: Range<usize>,
}

/// Decompressed chunks of one stripe, ready for decoding
#[derive(Debug)]
pub struct LoadedStripe {
    stripe: usize,
    segments: Vec<Segment>,
    chunks: HashMap<(usize, usize), ChunkRef>,
}

impl LoadedStripe {
    pub fn stripe_index(&self) -> usize {
        self.stripe
    }

    /// Decompressed bytes of the chunk for root field `column` and `row_group`
    pub fn chunk(&self, column: usize, row_group: usize) -> Option<&[u8]> {
        let chunk = self.chunks.get(&(column, row_group))?;
        Some(&self.segments[chunk.segment].as_slice()[chunk.range.clone()])
    }

    /// Number of pooled buffers held
    pub fn pooled_buffers(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Pooled(_)))
            .count()
    }
}

/// Loads stripes of one file for one record reader
#[derive(Debug)]
pub struct StripeLoader {
    storage: Arc<dyn Storage>,
    footer: Arc<Footer>,
    pool: Option<Arc<dyn BufferPool>>,
}

impl StripeLoader {
    /// `zero_copy` asks for pooled buffers; without a pool in the storage the
    /// loader quietly reads into fresh buffers instead
    pub fn new(storage: Arc<dyn Storage>, footer: Arc<Footer>, zero_copy: bool) -> Self {
        let pool = if zero_copy {
            let pool = storage.buffer_pool();
            if pool.is_none() {
                debug!(path = footer.path(), "zero-copy requested but storage has no buffer pool, copying");
            }
            pool
        } else {
            None
        };
        Self {
            storage,
            footer,
            pool,
        }
    }

    pub fn is_zero_copy(&self) -> bool {
        self.pool.is_some()
    }

    /// Read and decompress the chunks of `columns` for `row_groups`
    pub fn load(&self, metadata: &StripeMetadata, columns: &[usize], row_groups: &[usize]) -> Result<LoadedStripe> {
        let footer = &self.footer;
        let stripe = metadata.stripe().index();
        let path = footer.path();

        let mut wanted = Vec::with_capacity(columns.len() * row_groups.len());
        for &column in columns {
            for &row_group in row_groups {
                let location = metadata.chunk(column, row_group).ok_or_else(|| {
                    StripeFileError::corrupt_stripe(
                        path,
                        stripe,
                        format!("no chunk for column {} row group {}", column, row_group),
                    )
                })?;
                wanted.push(*location);
            }
        }
        wanted.sort_by_key(|location| location.offset);

        // merge chunks that follow each other in the file
        let mut reads: Vec<(u64, u64, Vec<usize>)> = Vec::new();
        for (i, location) in wanted.iter().enumerate() {
            match reads.last_mut() {
                Some((start, length, members)) if *start + *length == location.offset => {
                    *length += location.length;
                    members.push(i);
                }
                _ => reads.push((location.offset, location.length, vec![i])),
            }
        }

        let codec = footer.codec();
        let block_size = footer.compression_block_size();
        let mut segments = Vec::new();
        let mut chunks = HashMap::with_capacity(wanted.len());
        let mut bytes_read = 0u64;

        for (start, length, members) in &reads {
            let read_length = usize::try_from(*length)
                .map_err(|_| StripeFileError::corrupt_stripe(path, stripe, "chunk too large"))?;
            let raw = self.read(stripe, *start, read_length)?;
            bytes_read += *length;

            if codec == Codec::None {
                segments.push(raw);
                for &member in members {
                    let location = &wanted[member];
                    let begin = (location.offset - start) as usize;
                    let chunk = ChunkRef {
                        segment: segments.len() - 1,
                        range: begin..begin + location.length as usize,
                    };
                    chunks.insert((location.column, location.row_group), chunk);
                }
                continue;
            }

            // compressed bytes are only needed until decompressed; a pooled
            // `raw` goes back to the pool at the end of this iteration
            for &member in members {
                let location = &wanted[member];
                let begin = (location.offset - start) as usize;
                let compressed = &raw.as_slice()[begin..begin + location.length as usize];
                let decompressed = codec.decompress(compressed, block_size).map_err(|e| {
                    StripeFileError::corrupt_stripe(
                        path,
                        stripe,
                        format!("column {} row group {}: {}", location.column, location.row_group, e),
                    )
                })?;
                let range = 0..decompressed.len();
                segments.push(Segment::Heap(Bytes::from(decompressed)));
                let chunk = ChunkRef {
                    segment: segments.len() - 1,
                    range,
                };
                chunks.insert((location.column, location.row_group), chunk);
            }
        }

        debug!(
            path,
            stripe,
            chunks = wanted.len(),
            reads = reads.len(),
            bytes = bytes_read,
            zero_copy = self.pool.is_some(),
            "loaded stripe"
        );
        Ok(LoadedStripe {
            stripe,
            segments,
            chunks,
        })
    }

    fn read(&self, stripe: usize, offset: u64, length: usize) -> Result<Segment> {
        match &self.pool {
            Some(pool) => {
                // the guard returns the buffer to the pool if the read fails
                let mut buffer = PooledBuffer::acquire(pool.clone(), length);
                self.storage
                    .read_range_into(self.footer.path(), offset, buffer.as_mut_slice())
                    .map_err(|e| missing_as_corrupt(e, &self.footer, stripe))?;
                Ok(Segment::Pooled(buffer))
            }
            None => {
                read_stripe_range(self.storage.as_ref(), &self.footer, stripe, offset, length).map(Segment::Heap)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataReader;
    use crate::types::DataType;
    use crate::value::{read_chunk_header, Value};
    use crate::writer::{FileWriter, WriterOptions};
    use crate::ErrorKind;
    use storage::{ElasticBufferPool, MemoryStorage};

    fn write(codec: Codec) -> Vec<u8> {
        let schema = DataType::Struct(vec![
            ("a".to_string(), DataType::Long),
            ("b".to_string(), DataType::String),
            ("c".to_string(), DataType::Double),
        ]);
        let options = WriterOptions::default()
            .codec(codec)
            .row_index_stride(10)
            .stripe_rows(40);
        let mut writer = FileWriter::new(&schema, options).unwrap();
        for i in 0..40i64 {
            writer
                .add_row(vec![
                    Value::Long(i),
                    Value::String(format!("s{}", i)),
                    Value::Double(i as f64),
                ])
                .unwrap();
        }
        writer.finish().unwrap()
    }

    fn setup(codec: Codec, pool: Option<Arc<ElasticBufferPool>>) -> (Arc<dyn Storage>, Arc<Footer>) {
        let bytes = write(codec);
        let footer = Arc::new(Footer::parse("l.strp", &bytes, bytes.len() as u64).unwrap());
        let mut storage = MemoryStorage::new();
        if let Some(pool) = pool {
            storage = storage.with_buffer_pool(pool);
        }
        storage.put("l.strp", bytes);
        (Arc::new(storage), footer)
    }

    #[test]
    fn test_adjacent_chunks_share_a_read() {
        for codec in [Codec::None, Codec::Zstd] {
            let (storage, footer) = setup(codec, None);
            let metadata = MetadataReader::new(storage.clone(), footer.clone()).stripe_footer(0).unwrap();
            let loader = StripeLoader::new(storage, footer, false);

            let loaded = loader.load(&metadata, &[1, 3], &[1, 2]).unwrap();
            for column in [1, 3] {
                for group in [1, 2] {
                    let chunk = loaded.chunk(column, group).unwrap();
                    assert_eq!(read_chunk_header(chunk).unwrap().0, 10);
                }
            }
            assert!(loaded.chunk(1, 0).is_none());
            assert!(loaded.chunk(2, 1).is_none());
        }
    }

    #[test]
    fn test_pooled_buffers_return_on_drop() {
        let pool = Arc::new(ElasticBufferPool::new());
        let (storage, footer) = setup(Codec::None, Some(pool.clone()));
        let metadata = MetadataReader::new(storage.clone(), footer.clone()).stripe_footer(0).unwrap();
        let loader = StripeLoader::new(storage, footer, true);
        assert!(loader.is_zero_copy());

        // columns 1 and 3 are not adjacent, so two reads
        let loaded = loader.load(&metadata, &[1, 3], &[0, 1, 2, 3]).unwrap();
        assert_eq!(loaded.pooled_buffers(), 2);
        assert_eq!(pool.outstanding(), 2);
        drop(loaded);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.acquired(), 2);
    }

    #[test]
    fn test_compressed_reads_return_buffers_after_decompressing() {
        let pool = Arc::new(ElasticBufferPool::new());
        let (storage, footer) = setup(Codec::Zstd, Some(pool.clone()));
        let metadata = MetadataReader::new(storage.clone(), footer.clone()).stripe_footer(0).unwrap();
        let loader = StripeLoader::new(storage, footer, true);

        let loaded = loader.load(&metadata, &[1, 3], &[0, 1, 2, 3]).unwrap();
        assert_eq!(loaded.pooled_buffers(), 0);
        assert_eq!(pool.acquired(), 2);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(read_chunk_header(loaded.chunk(3, 2).unwrap()).unwrap().0, 10);

        // the second load is served from the buffers the first one returned
        let again = loader.load(&metadata, &[1, 3], &[0, 1, 2, 3]).unwrap();
        assert_eq!(again.chunk(1, 0), loaded.chunk(1, 0));
        assert_eq!(pool.acquired(), 4);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_failed_read_releases_buffer() {
        let pool = Arc::new(ElasticBufferPool::new());
        let bytes = write(Codec::None);
        let footer = Arc::new(Footer::parse("l.strp", &bytes, bytes.len() as u64).unwrap());
        let metadata_storage = MemoryStorage::new();
        metadata_storage.put("l.strp", bytes.clone());
        let metadata = MetadataReader::new(Arc::new(metadata_storage), footer.clone())
            .stripe_footer(0)
            .unwrap();

        // the data storage only holds the first few bytes
        let storage = MemoryStorage::new().with_buffer_pool(pool.clone());
        storage.put("l.strp", bytes[..8].to_vec());
        let loader = StripeLoader::new(Arc::new(storage), footer, true);

        let err = loader.load(&metadata, &[1], &[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptStripe);
        assert_eq!(pool.acquired(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_zero_copy_without_pool_falls_back() {
        let (storage, footer) = setup(Codec::Lz4, None);
        let metadata = MetadataReader::new(storage.clone(), footer.clone()).stripe_footer(0).unwrap();
        let loader = StripeLoader::new(storage, footer, true);
        assert!(!loader.is_zero_copy());
        let loaded = loader.load(&metadata, &[2], &[3]).unwrap();
        assert_eq!(loaded.pooled_buffers(), 0);
        assert!(loaded.chunk(2, 3).is_some());
    }
}
