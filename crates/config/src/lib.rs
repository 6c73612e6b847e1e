use anyhow::{Context, Result};
use config_rs::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Defaults applied to every record reader
    #[serde(default)]
    pub reader: ReaderConfig,

    /// S3 storage configuration, used when files live in object storage
    #[serde(default)]
    pub s3: S3Config,
}

/// Reader defaults. Per-request options override these when set explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Read stripe data into pooled buffers when the storage layer offers them (default: false)
    #[serde(default)]
    pub zero_copy: bool,

    /// Skip rows that fail to decode instead of failing the scan (default: false)
    #[serde(default)]
    pub skip_corrupt_records: bool,

    /// Rows returned per `next_batch` call when no explicit size is given (default: 1024)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Bytes read from the end of the file on open to find the footer (default: 16 KiB)
    #[serde(default = "default_tail_read_size")]
    pub tail_read_size: u64,
}

/// Configuration for S3-compatible object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 endpoint URL (e.g., "http://localhost:9000")
    /// Optional - if not provided, uses AWS SDK default endpoint for the region
    #[serde(default)]
    pub endpoint: String,

    /// S3 bucket name
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Prefix/path within the bucket under which files are resolved
    #[serde(default)]
    pub prefix: String,

    /// AWS region (required but ignored by Minio)
    #[serde(default = "default_region")]
    pub region: String,

    /// S3 access key ID
    #[serde(default)]
    pub access_key_id: String,

    /// S3 secret access key
    #[serde(default)]
    pub secret_access_key: String,

    /// S3 session token (optional, for temporary credentials)
    #[serde(default)]
    pub session_token: Option<String>,

    /// Allow HTTP connections (true for Minio, false for AWS S3)
    #[serde(default)]
    pub allow_http: bool,

    /// Use AWS environment credentials via AmazonS3Builder::from_env()
    #[serde(default)]
    pub use_env_credentials: bool,

    /// Maximum number of idle connections per host (default: 30)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Pool idle timeout in seconds (default: 120)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

// Default value functions
fn default_batch_size() -> usize {
    1024
}

fn default_tail_read_size() -> u64 {
    16 * 1024
}

fn default_bucket() -> String {
    "stripes".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_pool_max_idle_per_host() -> usize {
    30
}

fn default_pool_idle_timeout() -> u64 {
    120
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            zero_copy: false,
            skip_corrupt_records: false,
            batch_size: default_batch_size(),
            tail_read_size: default_tail_read_size(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: default_bucket(),
            prefix: String::new(),
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: None,
            allow_http: true,
            use_env_credentials: false,
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

impl Config {
    /// Load Config with layered configuration priority:
    /// 1. Default values
    /// 2. TOML file (if provided)
    /// 3. Environment variables (STRIPEFILE_<SECTION>__<KEY>, e.g. STRIPEFILE_READER__BATCH_SIZE)
    /// 4. Explicit AWS credentials from environment (fallback for empty credentials)
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            // Reader defaults
            .set_default("reader.zero_copy", false)?
            .set_default("reader.skip_corrupt_records", false)?
            .set_default("reader.batch_size", default_batch_size() as u64)?
            .set_default("reader.tail_read_size", default_tail_read_size())?
            // S3 defaults
            .set_default("s3.endpoint", "http://localhost:9000")?
            .set_default("s3.bucket", default_bucket())?
            .set_default("s3.prefix", "")?
            .set_default("s3.region", default_region())?
            .set_default("s3.allow_http", true)?
            .set_default("s3.use_env_credentials", false)?
            .set_default("s3.pool_max_idle_per_host", 30)?
            .set_default("s3.pool_idle_timeout_secs", 120)?;

        if let Some(file_path) = config_file {
            let path = Path::new(file_path);
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            builder = builder.add_source(File::from(path));
        }

        // STRIPEFILE_READER__ZERO_COPY, STRIPEFILE_S3__BUCKET, ...
        builder = builder.add_source(
            Environment::with_prefix("STRIPEFILE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut app_config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if app_config.s3.access_key_id.is_empty() {
            if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
                app_config.s3.access_key_id = key;
            }
        }

        if app_config.s3.secret_access_key.is_empty() {
            if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                app_config.s3.secret_access_key = secret;
            }
        }

        if app_config.s3.session_token.is_none() {
            if let Ok(token) = std::env::var("AWS_SESSION_TOKEN") {
                app_config.s3.session_token = Some(token);
            }
        }

        Ok(app_config)
    }

    /// Load Config from a TOML file
    ///
    /// Environment variables can still override values from the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path = path
            .to_str()
            .with_context(|| format!("Configuration path is not valid UTF-8: {}", path.display()))?;
        Self::load(Some(path))
    }

    /// Create a new Config from environment variables with defaults
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.reader.validate()?;
        Ok(())
    }
}

impl ReaderConfig {
    /// Validate the reader defaults
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "reader batch_size must be positive");
        // postscript length byte + smallest postscript
        anyhow::ensure!(
            self.tail_read_size >= 16,
            "reader tail_read_size must be at least 16 bytes"
        );
        Ok(())
    }
}

impl S3Config {
    /// Get the base URL for the configured bucket and prefix
    pub fn base_url(&self) -> String {
        if self.prefix.is_empty() {
            format!("{}/{}", self.endpoint, self.bucket)
        } else {
            format!("{}/{}/{}", self.endpoint, self.bucket, self.prefix)
        }
    }

    /// Validate the S3 configuration
    ///
    /// Only called by callers that actually open an object store.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.bucket.is_empty(), "S3 bucket cannot be empty");

        if !self.use_env_credentials {
            anyhow::ensure!(
                !self.endpoint.is_empty(),
                "S3 endpoint cannot be empty (unless use_env_credentials=true)"
            );
            anyhow::ensure!(
                !self.access_key_id.is_empty(),
                "S3 access key ID cannot be empty (unless use_env_credentials=true)"
            );
            anyhow::ensure!(
                !self.secret_access_key.is_empty(),
                "S3 secret access key cannot be empty (unless use_env_credentials=true)"
            );
        }

        Ok(())
    }
}
