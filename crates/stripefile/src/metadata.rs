//! Stripe footers without a record reader
//!
//! Every stripe ends with a footer listing its column chunks, its row count,
//! its column statistics and, when the file has a row-group index, the
//! statistics of every row group. [`MetadataReader`] reads just that footer,
//! which is all the planner and external optimizers need.

use std::sync::Arc;

use prost::Message;
use storage::Storage;
use tracing::debug;

use crate::error::{Result, StripeFileError};
use crate::footer::{Footer, StripeInformation};
use crate::loader::read_stripe_range;
use crate::proto;
use crate::statistics::ColumnStatistics;

/// Location of one column chunk inside a stripe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Type id of the root field the chunk belongs to
    pub column: usize,
    pub row_group: usize,
    /// Absolute byte offset in the file
    pub offset: u64,
    pub length: u64,
}

/// Decoded footer of one stripe
#[derive(Debug, Clone)]
pub struct StripeMetadata {
    stripe: StripeInformation,
    chunks: Vec<ChunkLocation>,
    statistics: Vec<ColumnStatistics>,
    /// Indexed by row group, then type id
    row_groups: Vec<Vec<ColumnStatistics>>,
}

impl StripeMetadata {
    pub fn stripe(&self) -> &StripeInformation {
        &self.stripe
    }

    /// Column chunks in physical order
    pub fn chunks(&self) -> &[ChunkLocation] {
        &self.chunks
    }

    pub fn chunk(&self, column: usize, row_group: usize) -> Option<&ChunkLocation> {
        self.chunks
            .iter()
            .find(|chunk| chunk.column == column && chunk.row_group == row_group)
    }

    /// Statistics of every type id over the whole stripe (empty if not recorded)
    pub fn statistics(&self) -> &[ColumnStatistics] {
        &self.statistics
    }

    /// Whether per-row-group statistics were recorded
    pub fn has_row_group_statistics(&self) -> bool {
        !self.row_groups.is_empty()
    }

    /// Statistics of every type id over one row group
    pub fn row_group_statistics(&self, row_group: usize) -> Option<&[ColumnStatistics]> {
        self.row_groups.get(row_group).map(Vec::as_slice)
    }
}

/// Reads stripe-level metadata of one open file
#[derive(Debug, Clone)]
pub struct MetadataReader {
    storage: Arc<dyn Storage>,
    footer: Arc<Footer>,
}

impl MetadataReader {
    pub fn new(storage: Arc<dyn Storage>, footer: Arc<Footer>) -> Self {
        Self { storage, footer }
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Read and validate the footer of stripe `index`
    pub fn stripe_footer(&self, index: usize) -> Result<StripeMetadata> {
        let footer = &self.footer;
        let path = footer.path();
        let stripe = footer.stripes().get(index).ok_or_else(|| {
            StripeFileError::invalid_options(format!(
                "stripe {} requested, file has {}",
                index,
                footer.stripes().len()
            ))
        })?;

        let length = usize::try_from(stripe.footer_length())
            .map_err(|_| StripeFileError::corrupt_stripe(path, index, "stripe footer too large"))?;
        let raw = read_stripe_range(
            self.storage.as_ref(),
            footer,
            index,
            stripe.footer_offset(),
            length,
        )?;
        let decompressed = footer
            .codec()
            .decompress(&raw, footer.compression_block_size())
            .map_err(|e| StripeFileError::corrupt_stripe(path, index, format!("stripe footer: {}", e)))?;
        let decoded = proto::StripeFooter::decode(decompressed.as_slice())
            .map_err(|e| StripeFileError::corrupt_stripe(path, index, format!("stripe footer: {}", e)))?;

        debug!(
            path,
            stripe = index,
            streams = decoded.streams.len(),
            "read stripe footer"
        );
        build_metadata(footer, stripe, decoded)
    }

    /// Column statistics of stripe `index`, one entry per type id
    pub fn stripe_statistics(&self, index: usize) -> Result<Vec<ColumnStatistics>> {
        Ok(self.stripe_footer(index)?.statistics)
    }

    /// Statistics of every row group of stripe `index`, indexed by row group then type id
    ///
    /// Empty when the file has no row-group index.
    pub fn row_group_statistics(&self, index: usize) -> Result<Vec<Vec<ColumnStatistics>>> {
        Ok(self.stripe_footer(index)?.row_groups)
    }
}

fn build_metadata(
    footer: &Footer,
    stripe: &StripeInformation,
    decoded: proto::StripeFooter,
) -> Result<StripeMetadata> {
    let path = footer.path();
    let index = stripe.index();
    let corrupt = |reason: String| StripeFileError::corrupt_stripe(path, index, reason);
    let types = footer.types();

    if decoded.number_of_rows != stripe.number_of_rows() {
        return Err(corrupt(format!(
            "stripe footer holds {} rows, directory says {}",
            decoded.number_of_rows,
            stripe.number_of_rows()
        )));
    }

    let row_groups = footer.row_groups_in(stripe.number_of_rows());
    let mut chunks = Vec::with_capacity(decoded.streams.len());
    let mut offset = stripe.offset() + stripe.index_length();
    for stream in &decoded.streams {
        let column = stream.column as usize;
        let row_group = stream.row_group as usize;
        if !types.top_level_columns().contains(&column) || row_group >= row_groups {
            return Err(corrupt(format!(
                "stream for column {} row group {} does not exist",
                column, row_group
            )));
        }
        chunks.push(ChunkLocation {
            column,
            row_group,
            offset,
            length: stream.length,
        });
        offset = offset
            .checked_add(stream.length)
            .ok_or_else(|| corrupt("stream lengths overflow".to_string()))?;
    }
    if offset != stripe.footer_offset() {
        return Err(corrupt(format!(
            "streams end at byte {}, stripe footer starts at {}",
            offset,
            stripe.footer_offset()
        )));
    }

    if !decoded.statistics.is_empty() && decoded.statistics.len() != types.len() {
        return Err(corrupt(format!(
            "{} column statistics for {} types",
            decoded.statistics.len(),
            types.len()
        )));
    }
    let statistics = decoded
        .statistics
        .iter()
        .map(ColumnStatistics::from_proto)
        .collect();

    let row_group_statistics = if decoded.row_index.is_empty() {
        Vec::new()
    } else {
        if decoded.row_index.len() != types.len() {
            return Err(corrupt(format!(
                "row index covers {} of {} types",
                decoded.row_index.len(),
                types.len()
            )));
        }
        let mut by_group = vec![Vec::with_capacity(types.len()); row_groups];
        for (id, index) in decoded.row_index.iter().enumerate() {
            if index.column as usize != id || index.entry.len() != row_groups {
                return Err(corrupt(format!(
                    "row index for column {} has {} entries, expected {} for column {}",
                    index.column,
                    index.entry.len(),
                    row_groups,
                    id
                )));
            }
            for (group, entry) in index.entry.iter().enumerate() {
                by_group[group].push(ColumnStatistics::from_proto(entry));
            }
        }
        by_group
    };

    Ok(StripeMetadata {
        stripe: stripe.clone(),
        chunks,
        statistics,
        row_groups: row_group_statistics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::statistics::TypeStatistics;
    use crate::types::DataType;
    use crate::value::Value;
    use crate::writer::{FileWriter, WriterOptions};
    use crate::ErrorKind;
    use storage::MemoryStorage;

    fn open(bytes: Vec<u8>) -> MetadataReader {
        let storage = MemoryStorage::new();
        let length = bytes.len() as u64;
        storage.put("m.strp", bytes.clone());
        let footer = Footer::parse("m.strp", &bytes, length).unwrap();
        MetadataReader::new(Arc::new(storage), Arc::new(footer))
    }

    fn write(stride: u32) -> Vec<u8> {
        let schema = DataType::Struct(vec![
            ("id".to_string(), DataType::Long),
            ("tag".to_string(), DataType::String),
        ]);
        let options = WriterOptions::default()
            .codec(Codec::Zlib)
            .row_index_stride(stride)
            .stripe_rows(30);
        let mut writer = FileWriter::new(&schema, options).unwrap();
        for i in 0..50i64 {
            writer
                .add_row(vec![Value::Long(i), Value::String(format!("t{}", i % 3))])
                .unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_stripe_statistics() {
        let reader = open(write(10));
        let stats = reader.stripe_statistics(1).unwrap();
        assert_eq!(stats.len(), 3);
        assert_eq!(
            stats[1].type_statistics(),
            &TypeStatistics::Integer {
                min: Some(30),
                max: Some(49),
                sum: Some((30..50).sum())
            }
        );
    }

    #[test]
    fn test_row_group_statistics_merge_to_stripe() {
        let reader = open(write(10));
        let metadata = reader.stripe_footer(0).unwrap();
        assert!(metadata.has_row_group_statistics());

        let groups = reader.row_group_statistics(0).unwrap();
        assert_eq!(groups.len(), 3);
        let mut merged = groups[0][1].clone();
        for group in &groups[1..] {
            merged.merge(&group[1]);
        }
        assert_eq!(&merged, &metadata.statistics()[1]);
        assert_eq!(
            groups[2][1].type_statistics(),
            &TypeStatistics::Integer {
                min: Some(20),
                max: Some(29),
                sum: Some((20..30).sum())
            }
        );
    }

    #[test]
    fn test_chunks_are_contiguous() {
        let reader = open(write(10));
        let metadata = reader.stripe_footer(0).unwrap();
        // 2 columns x 3 row groups
        assert_eq!(metadata.chunks().len(), 6);
        let first = metadata.chunks()[0];
        assert_eq!(first.offset, metadata.stripe().offset());
        for pair in metadata.chunks().windows(2) {
            assert_eq!(pair[0].offset + pair[0].length, pair[1].offset);
        }
        assert!(metadata.chunk(2, 1).is_some());
        assert!(metadata.chunk(2, 3).is_none());
    }

    #[test]
    fn test_without_row_index() {
        let reader = open(write(0));
        let metadata = reader.stripe_footer(0).unwrap();
        assert!(!metadata.has_row_group_statistics());
        assert_eq!(metadata.chunks().len(), 2);
        assert!(reader.row_group_statistics(0).unwrap().is_empty());
    }

    #[test]
    fn test_bad_index_and_missing_bytes() {
        let bytes = write(10);
        let reader = open(bytes.clone());
        assert_eq!(reader.stripe_footer(9).unwrap_err().kind(), ErrorKind::InvalidOptions);

        // storage holds a truncated copy while the footer describes the full file
        let storage = MemoryStorage::new();
        let footer = Footer::parse("m.strp", &bytes, bytes.len() as u64).unwrap();
        let stripe_end = footer.stripes()[0].footer_offset() as usize + 1;
        storage.put("m.strp", bytes[..stripe_end].to_vec());
        let reader = MetadataReader::new(Arc::new(storage), Arc::new(footer));
        let err = reader.stripe_footer(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptStripe);
    }
}
