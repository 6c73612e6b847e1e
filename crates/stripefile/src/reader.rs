//! Opening files and deriving record readers

use std::sync::Arc;

use bytes::Bytes;
use config::ReaderConfig;
use storage::Storage;
use tracing::{debug, info};

use crate::error::{Result, StripeFileError};
use crate::footer::{CompressionKind, Footer, StripeInformation, Version, WriterVersion};
use crate::metadata::MetadataReader;
use crate::options::Options;
use crate::plan::{self, ScanPlan};
use crate::record_reader::RecordReader;
use crate::statistics::ColumnStatistics;
use crate::types::TypeTree;

/// An open stripe file
///
/// The footer is parsed once in [`Reader::open`] and shared with every
/// record reader and metadata reader derived from this one. Cloning a
/// `Reader` is cheap.
#[derive(Debug, Clone)]
pub struct Reader {
    storage: Arc<dyn Storage>,
    footer: Arc<Footer>,
    config: ReaderConfig,
}

impl Reader {
    /// Open `path` and parse its footer
    pub fn open(storage: Arc<dyn Storage>, path: &str, config: ReaderConfig) -> Result<Self> {
        let file_length = storage.len(path)?;
        if file_length == 0 {
            return Err(StripeFileError::corrupt_format(path, "file is empty"));
        }

        let read_size = config.tail_read_size.clamp(1, file_length);
        let mut tail = read_tail(storage.as_ref(), path, file_length, read_size)?;
        // the last byte is the postscript length
        let postscript_end = tail.last().map_or(0, |&length| length as u64 + 1);
        if postscript_end > tail.len() as u64 && postscript_end <= file_length {
            tail = read_tail(storage.as_ref(), path, file_length, postscript_end)?;
        }
        let needed = Footer::tail_length(path, &tail, file_length)?;
        if needed > file_length {
            return Err(StripeFileError::corrupt_format(
                path,
                format!("tail of {} bytes is longer than the file ({} bytes)", needed, file_length),
            ));
        }
        if needed > tail.len() as u64 {
            debug!(path, read = tail.len(), needed, "tail read too short, reading again");
            tail = read_tail(storage.as_ref(), path, file_length, needed)?;
        }

        let footer = Footer::parse(path, &tail, file_length)?;
        info!(
            path,
            rows = footer.number_of_rows(),
            stripes = footer.stripes().len(),
            compression = ?footer.compression(),
            version = %footer.version(),
            "opened stripe file"
        );
        Ok(Self {
            storage,
            footer: Arc::new(footer),
            config,
        })
    }

    pub fn footer(&self) -> &Arc<Footer> {
        &self.footer
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn path(&self) -> &str {
        self.footer.path()
    }

    pub fn number_of_rows(&self) -> u64 {
        self.footer.number_of_rows()
    }

    pub fn content_length(&self) -> u64 {
        self.footer.content_length()
    }

    pub fn compression(&self) -> CompressionKind {
        self.footer.compression()
    }

    pub fn compression_block_size(&self) -> usize {
        self.footer.compression_block_size()
    }

    pub fn row_index_stride(&self) -> u32 {
        self.footer.row_index_stride()
    }

    pub fn stripes(&self) -> &[StripeInformation] {
        self.footer.stripes()
    }

    pub fn types(&self) -> &TypeTree {
        self.footer.types()
    }

    pub fn statistics(&self) -> &[ColumnStatistics] {
        self.footer.statistics()
    }

    pub fn version(&self) -> Version {
        self.footer.version()
    }

    pub fn writer_version(&self) -> WriterVersion {
        self.footer.writer_version()
    }

    pub fn metadata_keys(&self) -> impl Iterator<Item = &str> {
        self.footer.metadata_keys()
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Bytes> {
        self.footer.metadata_value(key)
    }

    pub fn has_metadata_value(&self, key: &str) -> bool {
        self.footer.has_metadata_value(key)
    }

    pub fn raw_data_size(&self) -> u64 {
        self.footer.raw_data_size()
    }

    pub fn raw_data_size_of_columns<S: AsRef<str>>(&self, names: &[S]) -> u64 {
        self.footer.raw_data_size_of_columns(names)
    }

    pub fn raw_data_size_from_col_indices(&self, ids: &[usize]) -> u64 {
        self.footer.raw_data_size_from_col_indices(ids)
    }

    /// Stripe-level metadata without a record reader
    pub fn metadata(&self) -> MetadataReader {
        MetadataReader::new(self.storage.clone(), self.footer.clone())
    }

    /// The stripes and row groups `options` would scan
    pub fn plan(&self, options: &Options) -> Result<ScanPlan> {
        let resolved = options.resolve(&self.footer, &self.config)?;
        Ok(plan::plan(&self.footer, &self.metadata(), &resolved))
    }

    /// Every row of the file
    pub fn rows(&self) -> Result<RecordReader> {
        self.rows_with_options(&Options::default())
    }

    pub fn rows_with_options(&self, options: &Options) -> Result<RecordReader> {
        let resolved = options.resolve(&self.footer, &self.config)?;
        debug!(path = self.path(), options = %options, "creating record reader");
        let plan = plan::plan(&self.footer, &self.metadata(), &resolved);
        Ok(RecordReader::new(
            self.storage.clone(),
            self.footer.clone(),
            plan,
            resolved,
        ))
    }

    /// Every row, reading only the included columns
    pub fn rows_with_include(&self, include: Vec<bool>) -> Result<RecordReader> {
        self.rows_with_options(&Options::builder().include(include).build())
    }

    /// Rows of the stripes starting inside `[offset, offset + length)`
    pub fn rows_in_range(
        &self,
        offset: u64,
        length: u64,
        include: Option<Vec<bool>>,
    ) -> Result<RecordReader> {
        let mut builder = Options::builder().range(offset, length);
        if let Some(include) = include {
            builder = builder.include(include);
        }
        self.rows_with_options(&builder.build())
    }
}

fn read_tail(storage: &dyn Storage, path: &str, file_length: u64, length: u64) -> Result<Bytes> {
    let size = usize::try_from(length)
        .map_err(|_| StripeFileError::corrupt_format(path, format!("tail of {} bytes", length)))?;
    Ok(storage.read_range(path, file_length - length, size)?)
}
