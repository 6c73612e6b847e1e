//! Minimal writer for building stripe files
//!
//! The writer buffers one stripe in memory, splits it into row groups of
//! `row_index_stride` rows and records statistics at every level. It exists
//! so that tests, benchmarks and tools can produce files; it makes no
//! attempt at clever encodings.

use prost::Message;
use tracing::debug;

use crate::codec::Codec;
use crate::error::{Result, StripeFileError};
use crate::footer::{Version, WriterVersion, MAGIC};
use crate::proto;
use crate::statistics::ColumnStatistics;
use crate::types::{DataType, TypeKind, TypeTree};
use crate::value::{write_frame, Value};

/// Layout choices for a [`FileWriter`]
#[derive(Debug, Clone)]
pub struct WriterOptions {
    codec: Codec,
    compression_block_size: usize,
    row_index_stride: u32,
    stripe_rows: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            codec: Codec::Zstd,
            compression_block_size: 64 * 1024,
            row_index_stride: 10_000,
            stripe_rows: 100_000,
        }
    }
}

impl WriterOptions {
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn compression_block_size(mut self, size: usize) -> Self {
        self.compression_block_size = size;
        self
    }

    /// Rows per row group; 0 writes no row-group index
    pub fn row_index_stride(mut self, stride: u32) -> Self {
        self.row_index_stride = stride;
        self
    }

    /// Rows per stripe
    pub fn stripe_rows(mut self, rows: usize) -> Self {
        self.stripe_rows = rows;
        self
    }
}

/// Rows of one row group, encoded per root field
#[derive(Debug)]
struct RowGroupBuffer {
    rows: u64,
    /// Encoded frames, one buffer per root field
    frames: Vec<Vec<u8>>,
    /// Statistics per type id
    statistics: Vec<ColumnStatistics>,
}

/// Writes a stripe file into memory
#[derive(Debug)]
pub struct FileWriter {
    types: TypeTree,
    options: WriterOptions,
    out: Vec<u8>,
    stripes: Vec<proto::StripeInformation>,
    statistics: Vec<ColumnStatistics>,
    metadata: Vec<proto::UserMetadataItem>,
    row_groups: Vec<RowGroupBuffer>,
    stripe_rows: u64,
    number_of_rows: u64,
}

impl FileWriter {
    pub fn new(schema: &DataType, options: WriterOptions) -> Result<Self> {
        let types = TypeTree::from_data_type(schema).map_err(StripeFileError::InvalidData)?;
        if options.stripe_rows == 0 {
            return Err(StripeFileError::InvalidData("stripe rows must be positive".to_string()));
        }
        if options.codec != Codec::None
            && !(1..=crate::codec::MAX_BLOCK_SIZE).contains(&options.compression_block_size)
        {
            return Err(StripeFileError::InvalidData(format!(
                "compression block size {} out of range",
                options.compression_block_size
            )));
        }
        let statistics = empty_statistics(&types);
        Ok(Self {
            types,
            options,
            out: MAGIC.as_bytes().to_vec(),
            stripes: Vec::new(),
            statistics,
            metadata: Vec::new(),
            row_groups: Vec::new(),
            stripe_rows: 0,
            number_of_rows: 0,
        })
    }

    pub fn types(&self) -> &TypeTree {
        &self.types
    }

    /// Attach a user metadata entry; a repeated key replaces the earlier value
    pub fn add_metadata(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.metadata.iter_mut().find(|item| item.name == key) {
            Some(item) => item.value = value,
            None => self.metadata.push(proto::UserMetadataItem {
                name: key.to_string(),
                value,
            }),
        }
    }

    /// Append one row, one value per root field
    pub fn add_row(&mut self, values: Vec<Value>) -> Result<()> {
        let columns = self.types.top_level_columns();
        if values.len() != columns.len() {
            return Err(StripeFileError::InvalidData(format!(
                "row has {} values, schema has {} fields",
                values.len(),
                columns.len()
            )));
        }

        // encode first so a bad row leaves the buffers untouched
        let mut encoded = Vec::with_capacity(columns.len());
        for (value, &column) in values.iter().zip(columns) {
            let mut frame = Vec::new();
            write_frame(&self.types, column, value, &mut frame).map_err(StripeFileError::InvalidData)?;
            encoded.push(frame);
        }

        let stride = self.options.row_index_stride as u64;
        let start_group = match self.row_groups.last() {
            None => true,
            Some(group) => stride > 0 && group.rows >= stride,
        };
        if start_group {
            self.row_groups.push(RowGroupBuffer {
                rows: 0,
                frames: vec![Vec::new(); columns.len()],
                statistics: empty_statistics(&self.types),
            });
        }
        let Some(group) = self.row_groups.last_mut() else {
            return Err(StripeFileError::InvalidData("no open row group".to_string()));
        };
        for (buffer, frame) in group.frames.iter_mut().zip(encoded) {
            buffer.extend_from_slice(&frame);
        }
        group.rows += 1;
        update_statistics(&self.types, 0, &Value::Struct(values), &mut group.statistics);

        self.stripe_rows += 1;
        self.number_of_rows += 1;
        if self.stripe_rows >= self.options.stripe_rows as u64 {
            self.flush_stripe()?;
        }
        Ok(())
    }

    /// Write the buffered rows as a stripe; does nothing when no rows are buffered
    pub fn flush_stripe(&mut self) -> Result<()> {
        if self.stripe_rows == 0 {
            return Ok(());
        }
        let codec = self.options.codec;
        let block_size = self.options.compression_block_size;
        let offset = self.out.len() as u64;
        let row_groups = std::mem::take(&mut self.row_groups);

        let mut streams = Vec::new();
        for (field, &column) in self.types.top_level_columns().iter().enumerate() {
            for (index, group) in row_groups.iter().enumerate() {
                let mut chunk = Vec::with_capacity(group.frames[field].len() + 10);
                prost::encoding::encode_varint(group.rows, &mut chunk);
                chunk.extend_from_slice(&group.frames[field]);
                let compressed = codec
                    .compress(&chunk, block_size)
                    .map_err(|e| StripeFileError::InvalidData(format!("compressing chunk: {}", e)))?;
                streams.push(proto::Stream {
                    column: column as u32,
                    row_group: index as u32,
                    length: compressed.len() as u64,
                });
                self.out.extend_from_slice(&compressed);
            }
        }
        let data_length = self.out.len() as u64 - offset;

        let mut statistics = empty_statistics(&self.types);
        for group in &row_groups {
            for (total, part) in statistics.iter_mut().zip(&group.statistics) {
                total.merge(part);
            }
        }
        let row_index = if self.options.row_index_stride > 0 {
            (0..self.types.len())
                .map(|id| proto::RowIndex {
                    column: id as u32,
                    entry: row_groups.iter().map(|group| group.statistics[id].to_proto()).collect(),
                })
                .collect()
        } else {
            Vec::new()
        };

        let stripe_footer = proto::StripeFooter {
            streams,
            number_of_rows: self.stripe_rows,
            statistics: statistics.iter().map(ColumnStatistics::to_proto).collect(),
            row_index,
        };
        let footer_bytes = codec
            .compress(&stripe_footer.encode_to_vec(), block_size)
            .map_err(|e| StripeFileError::InvalidData(format!("compressing stripe footer: {}", e)))?;
        self.out.extend_from_slice(&footer_bytes);

        for (total, part) in self.statistics.iter_mut().zip(&statistics) {
            total.merge(part);
        }
        debug!(
            stripe = self.stripes.len(),
            rows = self.stripe_rows,
            row_groups = row_groups.len(),
            bytes = self.out.len() as u64 - offset,
            "wrote stripe"
        );
        self.stripes.push(proto::StripeInformation {
            offset,
            index_length: 0,
            data_length,
            footer_length: footer_bytes.len() as u64,
            number_of_rows: self.stripe_rows,
        });
        self.stripe_rows = 0;
        Ok(())
    }

    /// Write the remaining rows and the file tail, returning the file's bytes
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.flush_stripe()?;
        let codec = self.options.codec;
        let block_size = self.options.compression_block_size;

        let footer = proto::Footer {
            header_length: MAGIC.len() as u64,
            content_length: self.out.len() as u64,
            stripes: self.stripes,
            types: self.types.to_proto(),
            metadata: self.metadata,
            number_of_rows: self.number_of_rows,
            statistics: self.statistics.iter().map(ColumnStatistics::to_proto).collect(),
            row_index_stride: self.options.row_index_stride,
        };
        let footer_bytes = codec
            .compress(&footer.encode_to_vec(), block_size)
            .map_err(|e| StripeFileError::InvalidData(format!("compressing footer: {}", e)))?;
        self.out.extend_from_slice(&footer_bytes);

        let postscript = proto::PostScript {
            footer_length: footer_bytes.len() as u64,
            compression: codec.kind() as i32,
            compression_block_size: block_size as u64,
            version: Version::CURRENT.to_parts(),
            writer_version: WriterVersion::CURRENT.id(),
            magic: MAGIC.to_string(),
        };
        let postscript_bytes = postscript.encode_to_vec();
        let postscript_length = u8::try_from(postscript_bytes.len())
            .map_err(|_| StripeFileError::InvalidData("postscript longer than 255 bytes".to_string()))?;
        self.out.extend_from_slice(&postscript_bytes);
        self.out.push(postscript_length);
        Ok(self.out)
    }
}

fn empty_statistics(types: &TypeTree) -> Vec<ColumnStatistics> {
    types.iter().map(|node| ColumnStatistics::new(node.kind())).collect()
}

/// Update the statistics of `id` and its subtree
fn update_statistics(types: &TypeTree, id: usize, value: &Value, statistics: &mut [ColumnStatistics]) {
    statistics[id].update(value);
    let Some(node) = types.get(id) else {
        return;
    };
    match (node.kind(), value) {
        // everything below a null compound value is null too
        (_, Value::Null) => {
            for descendant in statistics.iter_mut().take(node.maximum_id() + 1).skip(id + 1) {
                descendant.update(&Value::Null);
            }
        }
        (TypeKind::List, Value::List(items)) => {
            for item in items {
                update_statistics(types, node.children()[0], item, statistics);
            }
        }
        (TypeKind::Map, Value::Map(entries)) => {
            for (key, item) in entries {
                update_statistics(types, node.children()[0], key, statistics);
                update_statistics(types, node.children()[1], item, statistics);
            }
        }
        (TypeKind::Struct, Value::Struct(fields)) => {
            for (field, &child) in fields.iter().zip(node.children()) {
                update_statistics(types, child, field, statistics);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footer::Footer;
    use crate::statistics::TypeStatistics;

    fn schema() -> DataType {
        DataType::Struct(vec![
            ("id".to_string(), DataType::Long),
            ("tags".to_string(), DataType::List(Box::new(DataType::String))),
        ])
    }

    #[test]
    fn test_rejects_rows_that_do_not_fit() {
        let mut writer = FileWriter::new(&schema(), WriterOptions::default()).unwrap();
        let err = writer.add_row(vec![Value::Long(1)]).unwrap_err();
        assert!(matches!(err, StripeFileError::InvalidData(_)));

        let err = writer
            .add_row(vec![Value::String("x".to_string()), Value::Null])
            .unwrap_err();
        assert!(matches!(err, StripeFileError::InvalidData(_)));

        // nothing was buffered by the failed rows
        writer.add_row(vec![Value::Long(1), Value::Null]).unwrap();
        let bytes = writer.finish().unwrap();
        let footer = Footer::parse("w.strp", &bytes, bytes.len() as u64).unwrap();
        assert_eq!(footer.number_of_rows(), 1);
    }

    #[test]
    fn test_non_struct_schema_is_rejected() {
        assert!(FileWriter::new(&DataType::Long, WriterOptions::default()).is_err());
        assert!(FileWriter::new(&schema(), WriterOptions::default().stripe_rows(0)).is_err());
    }

    #[test]
    fn test_nested_statistics() {
        let mut writer = FileWriter::new(&schema(), WriterOptions::default().codec(Codec::Lz4)).unwrap();
        writer
            .add_row(vec![
                Value::Long(4),
                Value::List(vec![Value::String("b".to_string()), Value::String("a".to_string())]),
            ])
            .unwrap();
        writer.add_row(vec![Value::Long(9), Value::Null]).unwrap();
        let bytes = writer.finish().unwrap();
        let footer = Footer::parse("w.strp", &bytes, bytes.len() as u64).unwrap();

        let stats = footer.statistics();
        assert_eq!(stats[0].number_of_values(), 2);
        assert_eq!(stats[2].number_of_values(), 1);
        assert!(stats[2].has_null());
        assert_eq!(stats[3].number_of_values(), 2);
        // the null list makes its elements null as well
        assert!(stats[3].has_null());
        assert_eq!(
            stats[3].type_statistics(),
            &TypeStatistics::String {
                min: Some("a".to_string()),
                max: Some("b".to_string()),
                sum: 2
            }
        );
    }

    #[test]
    fn test_metadata_keys_are_unique() {
        let mut writer = FileWriter::new(&schema(), WriterOptions::default()).unwrap();
        writer.add_metadata("k", "one");
        writer.add_metadata("k", "two");
        let bytes = writer.finish().unwrap();
        let footer = Footer::parse("w.strp", &bytes, bytes.len() as u64).unwrap();
        assert_eq!(footer.metadata_keys().count(), 1);
        assert_eq!(footer.metadata_value("k").unwrap().as_ref(), &b"two"[..]);
        assert_eq!(footer.number_of_rows(), 0);
        assert!(footer.stripes().is_empty());
    }

    #[test]
    fn test_bad_block_size() {
        let options = WriterOptions::default().codec(Codec::Zlib).compression_block_size(0);
        let err = FileWriter::new(&schema(), options).unwrap_err();
        assert!(matches!(err, StripeFileError::InvalidData(_)));
    }
}
