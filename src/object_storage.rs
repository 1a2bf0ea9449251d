use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, instrument};

use crate::backends::common::Storage;
use crate::backends::local::LocalBackend;
use crate::backends::s3::S3Backend;
use crate::backends::Backend;
use crate::copy::CopyPolicy;
use crate::error::{Result, StorageError};
use crate::{Config, CopyOptions, FileInfo, ListOptions, ObjectFile, ObjectStream};

/// A parsed storage URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// `file:///path`: path on the local volume.
    Local {
        /// Path within the volume.
        path: String,
    },
    /// `s3://bucket/key`.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Object key, possibly empty.
        key: String,
    },
}

impl Location {
    /// Parses `file://` and `s3://` URIs.
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(after) = uri.strip_prefix("s3://") {
            let (bucket, key) = after.split_once('/').unwrap_or((after, ""));
            if bucket.is_empty() {
                return Err(StorageError::InvalidUri {
                    uri: uri.to_string(),
                    reason: "missing bucket name",
                });
            }
            Ok(Location::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        } else if let Some(path) = uri.strip_prefix("file://") {
            Ok(Location::Local { path: path.to_string() })
        } else {
            Err(StorageError::InvalidUri {
                uri: uri.to_string(),
                reason: "use 'file://' or 's3://'",
            })
        }
    }

    /// Key within the volume or bucket.
    pub fn path(&self) -> &str {
        match self {
            Location::Local { path } => path,
            Location::S3 { key, .. } => key,
        }
    }

    fn same_backend(&self, other: &Location) -> bool {
        matches!(
            (self, other),
            (Location::Local { .. }, Location::Local { .. }) | (Location::S3 { .. }, Location::S3 { .. })
        )
    }
}

/// Unified URI-addressed storage client.
#[derive(Clone)]
pub struct ObjectStorage {
    s3_client: Option<Arc<S3Client>>,
    local_root: PathBuf,
    copy_policy: CopyPolicy,
}

impl ObjectStorage {
    /// Creates a new storage client.
    ///
    /// The S3 client is built only when a region or endpoint is configured,
    /// here or through `AWS_REGION`.
    #[instrument]
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let s3_client = if config.s3_region.is_some()
            || config.s3_endpoint.is_some()
            || std::env::var("AWS_REGION").is_ok()
        {
            let region_provider = RegionProviderChain::first_try(config.s3_region.clone().map(Region::new))
                .or_default_provider()
                .or_else(Region::new("us-east-1"));
            let sdk_config = aws_config::from_env().region(region_provider).load().await;
            let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
            if let Some(endpoint) = &config.s3_endpoint {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }
            debug!(endpoint = ?config.s3_endpoint, "configured s3 client");
            Some(Arc::new(S3Client::from_conf(builder.build())))
        } else {
            None
        };

        Ok(Self {
            s3_client,
            local_root: config.local_root.unwrap_or_else(|| PathBuf::from("/")),
            copy_policy: CopyPolicy::default().with_part_concurrency(config.copy_part_concurrency),
        })
    }

    /// Storage client serving only `file://` URIs, rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            s3_client: None,
            local_root: root.into(),
            copy_policy: CopyPolicy::default(),
        }
    }

    /// Wraps an existing S3 client, e.g. one built with custom credentials.
    pub fn with_s3_client(mut self, client: Arc<S3Client>) -> Self {
        self.s3_client = Some(client);
        self
    }

    fn backend(&self, location: &Location) -> Result<Backend> {
        match location {
            Location::Local { .. } => Ok(LocalBackend::new(self.local_root.clone()).into()),
            Location::S3 { bucket, .. } => {
                let client = self
                    .s3_client
                    .as_ref()
                    .ok_or(StorageError::NotConfigured { backend: "s3" })?
                    .clone();
                Ok(S3Backend::new(client, bucket.as_str())
                    .with_policy(self.copy_policy)
                    .into())
            }
        }
    }

    fn resolve(&self, uri: &str) -> Result<(Backend, Location)> {
        let location = Location::parse(uri)?;
        let backend = self.backend(&location)?;
        Ok((backend, location))
    }

    /// Lists names under a URI prefix.
    #[instrument(skip(self))]
    pub async fn list(&self, uri: &str, options: &ListOptions) -> Result<Vec<String>> {
        let (backend, location) = self.resolve(uri)?;
        backend.list(location.path(), options).await
    }

    /// Calls `callback` with every file key below the URI.
    #[instrument(skip(self, callback))]
    pub async fn walk(&self, uri: &str, callback: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> Result<()> {
        let (backend, location) = self.resolve(uri)?;
        backend.walk(location.path(), callback).await
    }

    /// Creates a local file (remote backends do not support this).
    #[instrument(skip(self))]
    pub async fn create(&self, uri: &str) -> Result<Box<dyn ObjectFile>> {
        let (backend, location) = self.resolve(uri)?;
        backend.create(location.path()).await
    }

    /// Gets a byte stream for the object.
    #[instrument(skip(self))]
    pub async fn get(&self, uri: &str) -> Result<ObjectStream> {
        let (backend, location) = self.resolve(uri)?;
        backend.get(location.path()).await
    }

    /// Puts an object from a byte stream.
    #[instrument(skip(self, body))]
    pub async fn put(&self, uri: &str, body: ObjectStream) -> Result<()> {
        let (backend, location) = self.resolve(uri)?;
        backend.put(location.path(), body).await
    }

    /// Download location valid for `expire`.
    #[instrument(skip(self))]
    pub async fn link(&self, uri: &str, expire: Duration) -> Result<String> {
        let (backend, location) = self.resolve(uri)?;
        backend.link(location.path(), expire).await
    }

    /// Deletes an object.
    #[instrument(skip(self))]
    pub async fn delete(&self, uri: &str) -> Result<()> {
        let (backend, location) = self.resolve(uri)?;
        backend.delete(location.path()).await
    }

    /// Object metadata.
    #[instrument(skip(self))]
    pub async fn stat(&self, uri: &str) -> Result<FileInfo> {
        let (backend, location) = self.resolve(uri)?;
        backend.stat(location.path()).await
    }

    /// Copies an object: server-side within a backend, streamed across.
    ///
    /// Within S3 a different destination bucket is passed down as
    /// [`CopyOptions::destination_container`], overriding the one in `options`.
    #[instrument(skip(self))]
    pub async fn copy(&self, src: &str, dst: &str, options: &CopyOptions) -> Result<()> {
        let (src_backend, src_location) = self.resolve(src)?;
        let dst_location = Location::parse(dst)?;

        if src_location.same_backend(&dst_location) {
            let mut options = options.clone();
            if let (Location::S3 { bucket: from, .. }, Location::S3 { bucket: to, .. }) = (&src_location, &dst_location) {
                options.destination_container = (from != to).then(|| to.clone());
            }
            return src_backend
                .copy(src_location.path(), dst_location.path(), &options)
                .await;
        }

        debug!(from = src_backend.kind(), "streaming copy across backends");
        let dst_backend = self.backend(&dst_location)?;
        let body = src_backend.get(src_location.path()).await?;
        dst_backend.put(dst_location.path(), body).await
    }
}
