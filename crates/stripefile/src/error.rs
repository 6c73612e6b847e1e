//! Error types for stripe file reading

use storage::StorageError;
use thiserror::Error;

/// Result type for stripe file operations
pub type Result<T> = std::result::Result<T, StripeFileError>;

/// Coarse classification of a [`StripeFileError`]
///
/// Callers decide how far a failure reaches from its kind: a corrupt format
/// makes the whole file unusable, a corrupt stripe only poisons the record
/// reader that reached it, and a corrupt record can be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CorruptFormat,
    CorruptStripe,
    CorruptRecord,
    InvalidOptions,
    Io,
}

/// Errors that can occur while opening or scanning a stripe file
#[derive(Error, Debug)]
pub enum StripeFileError {
    /// The footer or postscript cannot be decoded or is inconsistent with the file
    #[error("Corrupt file format in {path}: {reason}")]
    CorruptFormat { path: String, reason: String },

    /// A stripe's bytes disagree with its descriptor
    #[error("Corrupt stripe {stripe} in {path}: {reason}")]
    CorruptStripe {
        path: String,
        stripe: usize,
        reason: String,
    },

    /// A single row failed to decode
    #[error("Corrupt record at row {row} in {path}: {reason}")]
    CorruptRecord {
        path: String,
        row: u64,
        reason: String,
    },

    /// The request cannot be served for this file
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The file uses a codec this build cannot decompress
    #[error("Unsupported compression {kind} in {path}")]
    UnsupportedCompression { path: String, kind: String },

    /// Data handed to the writer does not fit the schema
    #[error("Invalid data for writer: {0}")]
    InvalidData(String),

    /// A record reader that already failed was asked for more rows
    #[error("Record reader already failed: {message}")]
    ReaderFailed { kind: ErrorKind, message: String },

    /// Error from the storage layer
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StripeFileError {
    pub(crate) fn corrupt_format(path: &str, reason: impl Into<String>) -> Self {
        StripeFileError::CorruptFormat {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt_stripe(path: &str, stripe: usize, reason: impl Into<String>) -> Self {
        StripeFileError::CorruptStripe {
            path: path.to_string(),
            stripe,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_options(reason: impl Into<String>) -> Self {
        StripeFileError::InvalidOptions(reason.into())
    }

    /// Which class of failure this is
    pub fn kind(&self) -> ErrorKind {
        match self {
            StripeFileError::CorruptFormat { .. } => ErrorKind::CorruptFormat,
            StripeFileError::UnsupportedCompression { .. } => ErrorKind::CorruptFormat,
            StripeFileError::CorruptStripe { .. } => ErrorKind::CorruptStripe,
            StripeFileError::CorruptRecord { .. } => ErrorKind::CorruptRecord,
            StripeFileError::InvalidOptions(_) => ErrorKind::InvalidOptions,
            StripeFileError::InvalidData(_) => ErrorKind::InvalidOptions,
            StripeFileError::ReaderFailed { kind, .. } => *kind,
            StripeFileError::Storage(_) => ErrorKind::Io,
        }
    }
}
