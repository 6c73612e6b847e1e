//! Error types for storage operations

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised while locating or reading file bytes
#[derive(Error, Debug)]
pub enum StorageError {
    /// The file does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// The file ended before the requested range did
    #[error("Unexpected end of file {path}: wanted {length} bytes at offset {offset}, file has {file_length}")]
    UnexpectedEof {
        path: String,
        offset: u64,
        length: usize,
        file_length: u64,
    },

    /// I/O error from the local filesystem
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Object store error
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Object store could not be configured
    #[error("Object store configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io {
                path: path.to_string(),
                source,
            }
        }
    }

    /// Whether the failure means the requested bytes simply are not there
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_) | StorageError::UnexpectedEof { .. }
        )
    }
}
