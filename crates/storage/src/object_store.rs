use bytes::Bytes;
use config::S3Config;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ClientOptions;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::Storage;

/// Create an S3-compatible object store from configuration
///
/// Parameters:
/// - config: S3 configuration containing endpoint, bucket, credentials, etc.
///
/// Returns:
/// - Arc-wrapped ObjectStore configured according to the S3Config
pub fn create_object_store(config: &S3Config) -> Result<Arc<dyn ObjectStore>> {
    // Configure HTTP client options with connection pool settings
    let client_options = ClientOptions::new()
        .with_pool_max_idle_per_host(config.pool_max_idle_per_host)
        .with_pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs));

    let s3_builder = if config.use_env_credentials {
        info!("Using AWS environment credential chain");
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_client_options(client_options);

        // Only set endpoint if explicitly provided (AWS uses default regional endpoints)
        if !config.endpoint.is_empty() {
            builder = builder.with_endpoint(&config.endpoint);
        }

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }

        builder
    } else {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_client_options(client_options);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }

        builder
    };

    let s3_store: Arc<dyn ObjectStore> = Arc::new(s3_builder.build().map_err(|e| {
        StorageError::Configuration(format!("Failed to build S3 object store: {}", e))
    })?);

    Ok(s3_store)
}

/// Blocking [`Storage`] over an async [`ObjectStore`]
///
/// Owns a single-threaded tokio runtime and drives each request to completion
/// on the calling thread. Must not be used from inside another tokio runtime.
#[derive(Debug)]
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    runtime: Runtime,
}

impl ObjectStoreStorage {
    /// Wrap `store`, resolving file paths under `prefix`
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::Configuration(format!("Failed to start runtime: {}", e)))?;

        Ok(Self {
            store,
            prefix: prefix.into(),
            runtime,
        })
    }

    /// Storage for the bucket and prefix described by `config`
    pub fn from_config(config: &S3Config) -> Result<Self> {
        Self::new(create_object_store(config)?, config.prefix.clone())
    }

    fn location(&self, path: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(path)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix.trim_end_matches('/'), path))
        }
    }
}

fn map_store_error(path: &str, error: object_store::Error) -> StorageError {
    match error {
        object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
        other => StorageError::ObjectStore(other),
    }
}

impl Storage for ObjectStoreStorage {
    fn len(&self, path: &str) -> Result<u64> {
        let location = self.location(path);
        let meta = self
            .runtime
            .block_on(self.store.head(&location))
            .map_err(|e| map_store_error(path, e))?;
        Ok(meta.size)
    }

    fn read_range(&self, path: &str, offset: u64, length: usize) -> Result<Bytes> {
        let location = self.location(path);
        let eof = |file_length: u64| StorageError::UnexpectedEof {
            path: path.to_string(),
            offset,
            length,
            file_length,
        };
        let end = offset
            .checked_add(length as u64)
            .ok_or_else(|| eof(u64::MAX))?;

        debug!(%location, offset, length, "object store read");
        let bytes = self
            .runtime
            .block_on(self.store.get_range(&location, offset..end))
            .map_err(|e| map_store_error(path, e))?;

        if bytes.len() != length {
            return Err(eof(offset + bytes.len() as u64));
        }
        Ok(bytes)
    }
}
