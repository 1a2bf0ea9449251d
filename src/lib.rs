#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

//! A backend-agnostic async storage facade over a local filesystem volume and
//! S3-compatible object stores.
//! URIs use prefixes: `file:///path`, `s3://bucket/key`.
//!
//! # Features
//! - One capability contract ([`Storage`]): list, walk, copy, create, get,
//!   put, link, delete, stat.
//! - Closed set of backends ([`Backend`]): [`LocalBackend`] and [`S3Backend`].
//! - Server-side copy that falls back to a multipart `UploadPartCopy` for
//!   objects above the single-request limit ([`copy`]).
//! - Streaming get/put; cross-backend copies pipe one into the other.
//! - Shared `Arc` clients, no locking on the request path.
//!
//! # Usage
//! ```ignore
//! use storage_kit::{bytes_stream, Config, CopyOptions, ListOptions, ObjectStorage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ObjectStorage::new(Config::from_env()?).await?;
//!
//!     store.put("s3://my-bucket/file.txt", bytes_stream("hello")).await?;
//!     let names = store.list("s3://my-bucket/", &ListOptions::default()).await?;
//!
//!     // Same backend: server-side copy, multipart above 5 GiB.
//!     store
//!         .copy("s3://my-bucket/file.txt", "s3://archive/file.txt", &CopyOptions::default())
//!         .await?;
//!
//!     // Different backends: streamed.
//!     store
//!         .copy("s3://my-bucket/file.txt", "file:///tmp/file.txt", &CopyOptions::default())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod copy;
mod error;
mod object_ref;
mod object_storage;

use std::path::PathBuf;
use std::pin::Pin;

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite};

pub use backends::common::Storage;
pub use backends::local::LocalBackend;
pub use backends::s3::S3Backend;
pub use backends::Backend;
pub use copy::{copy_object, CopyOutcome, CopyPolicy};
pub use error::{BoxError, Result, Stage, StorageError};
pub use object_ref::{normalize_key, ObjectRef};
pub use object_storage::{Location, ObjectStorage};

/// Stream of object bytes.
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Readable and writable handle returned by [`Storage::create`].
pub trait ObjectFile: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ObjectFile for T {}

/// Wraps in-memory bytes as a single-chunk [`ObjectStream`].
pub fn bytes_stream(data: impl Into<Bytes>) -> ObjectStream {
    Box::pin(futures::stream::once(futures::future::ready(Ok::<_, StorageError>(data.into()))))
}

/// Configuration for storage backends.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional S3 region (falls back to the environment, then `us-east-1`).
    pub s3_region: Option<String>,
    /// Optional S3-compatible endpoint, e.g. a MinIO URL. Enables path-style
    /// addressing.
    pub s3_endpoint: Option<String>,
    /// Root of the local volume `file://` URIs resolve against. Defaults to `/`.
    pub local_root: Option<PathBuf>,
    /// Part copies in flight at once during a multipart copy.
    pub copy_part_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            s3_region: None,
            s3_endpoint: None,
            local_root: None,
            copy_part_concurrency: 1,
        }
    }
}

impl Config {
    /// Reads `STORAGE_S3_REGION`, `STORAGE_S3_ENDPOINT`, `STORAGE_LOCAL_ROOT`
    /// and `STORAGE_COPY_CONCURRENCY`. Unset variables keep their defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self {
            s3_region: lookup("STORAGE_S3_REGION"),
            s3_endpoint: lookup("STORAGE_S3_ENDPOINT"),
            local_root: lookup("STORAGE_LOCAL_ROOT").map(PathBuf::from),
            ..Self::default()
        };
        if let Some(raw) = lookup("STORAGE_COPY_CONCURRENCY") {
            let parsed: usize = raw
                .parse()
                .with_context(|| format!("STORAGE_COPY_CONCURRENCY is not a number: {raw}"))?;
            anyhow::ensure!(parsed > 0, "STORAGE_COPY_CONCURRENCY must be at least 1");
            config.copy_part_concurrency = parsed;
        }
        Ok(config)
    }
}

/// Metadata for an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Key relative to the volume or bucket.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Unix permission bits (local backend only).
    pub mode: Option<u32>,
    /// Last modified timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    /// ETag (remote backend only).
    pub etag: Option<String>,
    /// Content type (remote backend only).
    pub content_type: Option<String>,
}

/// Options recognized by [`Storage::copy`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Destination bucket (remote) or volume root (local) when it differs
    /// from the source's.
    pub destination_container: Option<String>,
    /// Permission bits of the copy (local backend, Unix only). Defaults to
    /// `0o644`.
    pub mode: Option<u32>,
}

/// Options recognized by [`Storage::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Group keys by this delimiter and return the common prefixes' base
    /// names (remote backend only).
    pub delimiter: Option<String>,
}
