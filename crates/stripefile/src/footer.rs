//! The parsed file tail
//!
//! A file ends with a compressed footer, an uncompressed postscript and a
//! single byte holding the postscript's length:
//!
//! ```text
//! "STRP" | stripes... | Footer | PostScript | u8
//! ```
//!
//! [`Footer::parse`] decodes and cross-checks all of it once; the result is
//! immutable and shared by every reader derived from the same open file.

use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use prost::Message;

use crate::codec::{Codec, MAX_BLOCK_SIZE};
use crate::error::{Result, StripeFileError};
use crate::proto;
use crate::statistics::{ColumnStatistics, TypeStatistics};
use crate::types::{TypeKind, TypeTree};

pub use crate::proto::CompressionKind;

/// Bytes at the start of every file
pub const MAGIC: &str = "STRP";

/// File format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u32,
    minor: u32,
}

impl Version {
    pub const V0_11: Version = Version { major: 0, minor: 11 };
    pub const V0_12: Version = Version { major: 0, minor: 12 };

    /// Version written by this crate
    pub const CURRENT: Version = Version::V0_12;

    /// Recognize a version from its serialized components
    ///
    /// Files that predate versioning carry no components and are read as 0.11.
    pub fn from_parts(parts: &[u32]) -> Option<Version> {
        match parts {
            [] => Some(Version::V0_11),
            [major, minor, ..] => [Version::V0_11, Version::V0_12]
                .into_iter()
                .find(|v| v.major == *major && v.minor == *minor),
            [_] => None,
        }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub(crate) fn to_parts(self) -> Vec<u32> {
        vec![self.major, self.minor]
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Revision of the writer that produced a file
///
/// Unlike the format version, an unknown writer revision is not an error:
/// newer writers produce files older readers can still read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterVersion {
    /// Writers before row-group statistics were recorded per stripe
    Original,
    /// Writers that record row-group statistics in every stripe footer
    RowGroupStatistics,
    /// A revision newer than this reader knows about
    Future(u32),
}

impl WriterVersion {
    pub const CURRENT: WriterVersion = WriterVersion::RowGroupStatistics;

    pub fn from_id(id: u32) -> WriterVersion {
        match id {
            0 => WriterVersion::Original,
            1 => WriterVersion::RowGroupStatistics,
            other => WriterVersion::Future(other),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            WriterVersion::Original => 0,
            WriterVersion::RowGroupStatistics => 1,
            WriterVersion::Future(id) => id,
        }
    }
}

/// Where one stripe lives and how many rows it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeInformation {
    index: usize,
    offset: u64,
    index_length: u64,
    data_length: u64,
    footer_length: u64,
    number_of_rows: u64,
    first_row: u64,
}

impl StripeInformation {
    /// Position of this stripe in the file
    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte offset of the stripe's first byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn index_length(&self) -> u64 {
        self.index_length
    }

    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    pub fn footer_length(&self) -> u64 {
        self.footer_length
    }

    /// Total bytes of the stripe including its footer
    pub fn length(&self) -> u64 {
        self.index_length + self.data_length + self.footer_length
    }

    /// Byte offset of the stripe footer
    pub fn footer_offset(&self) -> u64 {
        self.offset + self.index_length + self.data_length
    }

    pub fn number_of_rows(&self) -> u64 {
        self.number_of_rows
    }

    /// Absolute row number of the stripe's first row
    pub fn first_row(&self) -> u64 {
        self.first_row
    }
}

/// Immutable file-level metadata
#[derive(Debug, Clone)]
pub struct Footer {
    path: String,
    file_length: u64,
    compression: CompressionKind,
    codec: Codec,
    compression_block_size: usize,
    version: Version,
    writer_version: WriterVersion,
    postscript_length: u64,
    footer_length: u64,
    content_length: u64,
    number_of_rows: u64,
    row_index_stride: u32,
    types: TypeTree,
    stripes: Vec<StripeInformation>,
    statistics: Vec<ColumnStatistics>,
    metadata: Vec<(String, Bytes)>,
}

impl Footer {
    /// Number of bytes at the end of the file that hold the tail
    ///
    /// `tail` must end at the end of the file and contain at least the
    /// postscript; the returned length may exceed `tail.len()`, in which case
    /// the caller has to read more before calling [`Footer::parse`].
    pub fn tail_length(path: &str, tail: &[u8], file_length: u64) -> Result<u64> {
        let (postscript, postscript_length) = read_postscript(path, tail, file_length)?;
        Ok((1 + postscript_length as u64).saturating_add(postscript.footer_length))
    }

    /// Parse a file's tail
    ///
    /// `tail` holds the last bytes of the file, at least
    /// [`Footer::tail_length`] of them.
    pub fn parse(path: &str, tail: &[u8], file_length: u64) -> Result<Footer> {
        let (postscript, postscript_length) = read_postscript(path, tail, file_length)?;

        let version = Version::from_parts(&postscript.version).ok_or_else(|| {
            StripeFileError::corrupt_format(
                path,
                format!("unsupported file version {:?}", postscript.version),
            )
        })?;
        let writer_version = WriterVersion::from_id(postscript.writer_version);

        let compression = CompressionKind::try_from(postscript.compression).map_err(|_| {
            StripeFileError::corrupt_format(
                path,
                format!("unknown compression kind {}", postscript.compression),
            )
        })?;
        let codec = Codec::for_kind(compression).ok_or_else(|| {
            StripeFileError::UnsupportedCompression {
                path: path.to_string(),
                kind: format!("{:?}", compression),
            }
        })?;
        let compression_block_size = usize::try_from(postscript.compression_block_size)
            .ok()
            .filter(|size| codec == Codec::None || (1..=MAX_BLOCK_SIZE).contains(size))
            .ok_or_else(|| {
                StripeFileError::corrupt_format(
                    path,
                    format!(
                        "compression block size {} out of range",
                        postscript.compression_block_size
                    ),
                )
            })?;

        let tail_length = (1 + postscript_length as u64).saturating_add(postscript.footer_length);
        if tail_length.saturating_add(MAGIC.len() as u64) > file_length {
            return Err(StripeFileError::corrupt_format(
                path,
                format!(
                    "footer of {} bytes does not fit in file of {} bytes",
                    postscript.footer_length, file_length
                ),
            ));
        }
        if tail_length > tail.len() as u64 {
            return Err(StripeFileError::corrupt_format(
                path,
                format!("tail of {} bytes needs {} bytes", tail.len(), tail_length),
            ));
        }

        let footer_end = tail.len() - 1 - postscript_length;
        let footer_start = footer_end - postscript.footer_length as usize;
        let footer_bytes = codec
            .decompress(&tail[footer_start..footer_end], compression_block_size)
            .map_err(|e| StripeFileError::corrupt_format(path, format!("footer: {}", e)))?;
        let footer = proto::Footer::decode(footer_bytes.as_slice())
            .map_err(|e| StripeFileError::corrupt_format(path, format!("footer: {}", e)))?;

        let content_length = file_length - tail_length;
        if footer.content_length != content_length {
            return Err(StripeFileError::corrupt_format(
                path,
                format!(
                    "footer content length {} disagrees with {} bytes before the footer",
                    footer.content_length, content_length
                ),
            ));
        }
        if footer.header_length != MAGIC.len() as u64 {
            return Err(StripeFileError::corrupt_format(
                path,
                format!("unexpected header length {}", footer.header_length),
            ));
        }

        let types = TypeTree::from_proto(&footer.types)
            .map_err(|reason| StripeFileError::corrupt_format(path, reason))?;

        let stripes = build_stripes(path, &footer, content_length)?;

        if !footer.statistics.is_empty() && footer.statistics.len() != types.len() {
            return Err(StripeFileError::corrupt_format(
                path,
                format!(
                    "{} column statistics for {} types",
                    footer.statistics.len(),
                    types.len()
                ),
            ));
        }
        let statistics = footer
            .statistics
            .iter()
            .map(ColumnStatistics::from_proto)
            .collect();

        let mut seen = HashSet::new();
        let mut metadata = Vec::with_capacity(footer.metadata.len());
        for item in footer.metadata {
            if !seen.insert(item.name.clone()) {
                return Err(StripeFileError::corrupt_format(
                    path,
                    format!("duplicate metadata key '{}'", item.name),
                ));
            }
            metadata.push((item.name, Bytes::from(item.value)));
        }

        Ok(Footer {
            path: path.to_string(),
            file_length,
            compression,
            codec,
            compression_block_size,
            version,
            writer_version,
            postscript_length: postscript_length as u64,
            footer_length: postscript.footer_length,
            content_length,
            number_of_rows: footer.number_of_rows,
            row_index_stride: footer.row_index_stride,
            types,
            stripes,
            statistics,
            metadata,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Physical length of the file
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn number_of_rows(&self) -> u64 {
        self.number_of_rows
    }

    /// Bytes before the footer: header plus all stripes
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn compression(&self) -> CompressionKind {
        self.compression
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn compression_block_size(&self) -> usize {
        self.compression_block_size
    }

    /// Rows per row group; 0 when the file has no row-group index
    pub fn row_index_stride(&self) -> u32 {
        self.row_index_stride
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn writer_version(&self) -> WriterVersion {
        self.writer_version
    }

    pub fn footer_length(&self) -> u64 {
        self.footer_length
    }

    pub fn postscript_length(&self) -> u64 {
        self.postscript_length
    }

    pub fn types(&self) -> &TypeTree {
        &self.types
    }

    pub fn stripes(&self) -> &[StripeInformation] {
        &self.stripes
    }

    /// File-level statistics, one entry per type id (empty if not recorded)
    pub fn statistics(&self) -> &[ColumnStatistics] {
        &self.statistics
    }

    /// Number of row groups in a stripe of `rows` rows
    pub fn row_groups_in(&self, rows: u64) -> usize {
        match self.row_index_stride {
            0 => 1,
            stride => rows.div_ceil(stride as u64).max(1) as usize,
        }
    }

    /// User metadata keys, in file order
    pub fn metadata_keys(&self) -> impl Iterator<Item = &str> {
        self.metadata.iter().map(|(key, _)| key.as_str())
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Bytes> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }

    pub fn has_metadata_value(&self, key: &str) -> bool {
        self.metadata_value(key).is_some()
    }

    /// Estimated in-memory size of all decoded rows
    pub fn raw_data_size(&self) -> u64 {
        self.raw_data_size_from_col_indices(self.types.top_level_columns())
    }

    /// Estimated in-memory size of the named root fields
    ///
    /// Unknown names contribute nothing.
    pub fn raw_data_size_of_columns<S: AsRef<str>>(&self, names: &[S]) -> u64 {
        let ids: Vec<usize> = names
            .iter()
            .filter_map(|name| self.types.find_column(name.as_ref()))
            .collect();
        self.raw_data_size_from_col_indices(&ids)
    }

    /// Estimated in-memory size of the given type ids and everything below them
    pub fn raw_data_size_from_col_indices(&self, ids: &[usize]) -> u64 {
        let mut counted = vec![false; self.types.len()];
        for &id in ids {
            if let Some(node) = self.types.get(id) {
                for inner in id..=node.maximum_id() {
                    counted[inner] = true;
                }
            }
        }
        counted
            .iter()
            .enumerate()
            .filter(|(_, &counted)| counted)
            .map(|(id, _)| self.raw_size_of(id))
            .fold(0u64, u64::saturating_add)
    }

    fn raw_size_of(&self, id: usize) -> u64 {
        let (Some(node), Some(stats)) = (self.types.get(id), self.statistics.get(id)) else {
            return 0;
        };
        let values = stats.number_of_values();
        let fixed = |width: u64| values.saturating_mul(width);
        match (node.kind(), stats.type_statistics()) {
            (TypeKind::Boolean | TypeKind::Byte, _) => fixed(1),
            (TypeKind::Short, _) => fixed(2),
            (TypeKind::Int | TypeKind::Float | TypeKind::Date, _) => fixed(4),
            (TypeKind::Long | TypeKind::Double | TypeKind::Timestamp, _) => fixed(8),
            (TypeKind::String, TypeStatistics::String { sum, .. }) => (*sum).max(0) as u64,
            (TypeKind::Binary, TypeStatistics::Binary { sum }) => (*sum).max(0) as u64,
            _ => 0,
        }
    }
}

fn read_postscript(path: &str, tail: &[u8], file_length: u64) -> Result<(proto::PostScript, usize)> {
    if file_length < MAGIC.len() as u64 + 1 {
        return Err(StripeFileError::corrupt_format(
            path,
            format!("file of {} bytes is too short", file_length),
        ));
    }
    if tail.len() as u64 > file_length {
        return Err(StripeFileError::corrupt_format(
            path,
            format!("tail of {} bytes is longer than the file", tail.len()),
        ));
    }
    let Some(&length_byte) = tail.last() else {
        return Err(StripeFileError::corrupt_format(path, "empty tail"));
    };
    let postscript_length = length_byte as usize;
    if postscript_length == 0 || postscript_length + 1 > tail.len() {
        return Err(StripeFileError::corrupt_format(
            path,
            format!("invalid postscript length {}", postscript_length),
        ));
    }

    let start = tail.len() - 1 - postscript_length;
    let postscript = proto::PostScript::decode(&tail[start..tail.len() - 1])
        .map_err(|e| StripeFileError::corrupt_format(path, format!("postscript: {}", e)))?;
    if postscript.magic != MAGIC {
        return Err(StripeFileError::corrupt_format(
            path,
            format!("bad magic '{}'", postscript.magic.escape_debug()),
        ));
    }
    Ok((postscript, postscript_length))
}

fn build_stripes(path: &str, footer: &proto::Footer, content_length: u64) -> Result<Vec<StripeInformation>> {
    let mut stripes = Vec::with_capacity(footer.stripes.len());
    let mut next_offset = footer.header_length;
    let mut first_row = 0u64;

    for (index, stripe) in footer.stripes.iter().enumerate() {
        let end = stripe
            .offset
            .checked_add(stripe.index_length)
            .and_then(|v| v.checked_add(stripe.data_length))
            .and_then(|v| v.checked_add(stripe.footer_length));
        let Some(end) = end.filter(|&end| stripe.offset >= next_offset && end <= content_length)
        else {
            return Err(StripeFileError::corrupt_format(
                path,
                format!(
                    "stripe {} at offset {} overlaps its neighbours or the file bounds",
                    index, stripe.offset
                ),
            ));
        };
        if stripe.footer_length == 0 {
            return Err(StripeFileError::corrupt_format(
                path,
                format!("stripe {} has no footer", index),
            ));
        }

        stripes.push(StripeInformation {
            index,
            offset: stripe.offset,
            index_length: stripe.index_length,
            data_length: stripe.data_length,
            footer_length: stripe.footer_length,
            number_of_rows: stripe.number_of_rows,
            first_row,
        });
        next_offset = end;
        first_row = first_row.checked_add(stripe.number_of_rows).ok_or_else(|| {
            StripeFileError::corrupt_format(path, "row count overflows")
        })?;
    }

    if first_row != footer.number_of_rows {
        return Err(StripeFileError::corrupt_format(
            path,
            format!(
                "stripes hold {} rows but the footer claims {}",
                first_row, footer.number_of_rows
            ),
        ));
    }
    Ok(stripes)
}
