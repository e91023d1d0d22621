//! Content-addressed artifact storage.
//!
//! Vendor URLs are transient, so every result artifact is copied into a
//! [`BlobStore`] under its SHA-256 content hash. Storing the same bytes
//! twice yields the same URL.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object upload failed: {0}")]
    Upload(String),

    #[error("Invalid blob configuration: {0}")]
    Config(String),
}

/// "Store bytes, get URL" service.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        bytes: Bytes,
        content_hash: &str,
        content_type: &str,
    ) -> Result<String, BlobError>;
}

/// File extension for a stored object.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        _ => "bin",
    }
}

/// Object key for a content hash: `ab/abcdef....png`.
pub fn object_key(content_hash: &str, content_type: &str) -> String {
    let prefix = content_hash.get(..2).unwrap_or("00");
    format!("{prefix}/{content_hash}.{}", extension_for(content_type))
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Stores objects under a root directory and serves them from a base URL.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(
        &self,
        bytes: Bytes,
        content_hash: &str,
        content_type: &str,
    ) -> Result<String, BlobError> {
        let key = object_key(content_hash, content_type);
        let path = self.root.join(&key);

        if !tokio::fs::try_exists(&path).await? {
            let parent = path.parent().unwrap_or(self.root.as_path()).to_path_buf();
            tokio::fs::create_dir_all(&parent).await?;

            let size = bytes.len();
            let target = path.clone();
            tokio::task::spawn_blocking(move || write_new_object(&parent, &target, &bytes))
                .await
                .map_err(io::Error::other)??;
            tracing::debug!(key = %key, size, "Stored blob");
        }

        Ok(format!("{}/{key}", self.public_base_url))
    }
}

/// Write `bytes` to a unique temp file in `dir`, then move it to `path`.
///
/// A concurrent writer that got there first stored the same content, so an
/// existing target counts as success.
fn write_new_object(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.error),
    }
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// Stores objects in an S3 bucket.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl S3BlobStore {
    pub fn new(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a client from the ambient AWS configuration.
    pub async fn from_env(
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        let sdk_config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&sdk_config), bucket, public_base_url)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        bytes: Bytes,
        content_hash: &str,
        content_type: &str,
    ) -> Result<String, BlobError> {
        let key = object_key(content_hash, content_type);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                BlobError::Upload(aws_sdk_s3::error::DisplayErrorContext(&e).to_string())
            })?;

        tracing::debug!(bucket = %self.bucket, key = %key, "Uploaded blob");
        Ok(format!("{}/{key}", self.public_base_url))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which blob backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobConfig {
    Local {
        root: PathBuf,
        public_base_url: String,
    },
    S3 {
        bucket: String,
        public_base_url: String,
    },
}

impl BlobConfig {
    /// Load from environment variables.
    ///
    /// | Env var                | Default                          |
    /// |------------------------|----------------------------------|
    /// | `BLOB_BACKEND`         | `local`                          |
    /// | `BLOB_LOCAL_ROOT`      | `./data/artifacts`               |
    /// | `BLOB_PUBLIC_BASE_URL` | `http://localhost:3000/artifacts`|
    /// | `BLOB_S3_BUCKET`       | required when backend is `s3`    |
    pub fn from_env() -> Result<Self, BlobError> {
        let backend = std::env::var("BLOB_BACKEND").unwrap_or_else(|_| "local".into());
        let public_base_url = std::env::var("BLOB_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000/artifacts".into());

        match backend.as_str() {
            "local" => Ok(BlobConfig::Local {
                root: std::env::var("BLOB_LOCAL_ROOT")
                    .unwrap_or_else(|_| "./data/artifacts".into())
                    .into(),
                public_base_url,
            }),
            "s3" => {
                let bucket = std::env::var("BLOB_S3_BUCKET").map_err(|_| {
                    BlobError::Config("BLOB_S3_BUCKET is required for the s3 backend".into())
                })?;
                Ok(BlobConfig::S3 {
                    bucket,
                    public_base_url,
                })
            }
            other => Err(BlobError::Config(format!(
                "Unknown BLOB_BACKEND '{other}'. Must be one of: local, s3"
            ))),
        }
    }

    /// Construct the configured store.
    pub async fn build(&self) -> std::sync::Arc<dyn BlobStore> {
        match self {
            BlobConfig::Local {
                root,
                public_base_url,
            } => std::sync::Arc::new(LocalBlobStore::new(root.clone(), public_base_url.clone())),
            BlobConfig::S3 {
                bucket,
                public_base_url,
            } => std::sync::Arc::new(S3BlobStore::from_env(bucket.clone(), public_base_url.clone()).await),
        }
    }
}
