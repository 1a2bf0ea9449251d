//! Backend implementations of the [`Storage`] contract.

pub mod common;
pub mod local;
pub mod s3;

use std::time::Duration;

use async_trait::async_trait;

use self::common::Storage;
use self::local::LocalBackend;
use self::s3::S3Backend;
use crate::{CopyOptions, FileInfo, ListOptions, ObjectFile, ObjectStream, Result};

/// The closed set of storage backends.
pub enum Backend {
    /// Filesystem volume.
    Local(LocalBackend),
    /// S3 bucket.
    S3(S3Backend),
}

impl Backend {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::S3(_) => "s3",
        }
    }
}

impl From<LocalBackend> for Backend {
    fn from(backend: LocalBackend) -> Self {
        Backend::Local(backend)
    }
}

impl From<S3Backend> for Backend {
    fn from(backend: S3Backend) -> Self {
        Backend::S3(backend)
    }
}

#[async_trait]
impl Storage for Backend {
    async fn list(&self, path: &str, options: &ListOptions) -> Result<Vec<String>> {
        match self {
            Backend::Local(b) => b.list(path, options).await,
            Backend::S3(b) => b.list(path, options).await,
        }
    }

    async fn walk(&self, path: &str, callback: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> Result<()> {
        match self {
            Backend::Local(b) => b.walk(path, callback).await,
            Backend::S3(b) => b.walk(path, callback).await,
        }
    }

    async fn copy(&self, src: &str, dst: &str, options: &CopyOptions) -> Result<()> {
        match self {
            Backend::Local(b) => b.copy(src, dst, options).await,
            Backend::S3(b) => b.copy(src, dst, options).await,
        }
    }

    async fn create(&self, path: &str) -> Result<Box<dyn ObjectFile>> {
        match self {
            Backend::Local(b) => b.create(path).await,
            Backend::S3(b) => b.create(path).await,
        }
    }

    async fn get(&self, path: &str) -> Result<ObjectStream> {
        match self {
            Backend::Local(b) => b.get(path).await,
            Backend::S3(b) => b.get(path).await,
        }
    }

    async fn put(&self, path: &str, body: ObjectStream) -> Result<()> {
        match self {
            Backend::Local(b) => b.put(path, body).await,
            Backend::S3(b) => b.put(path, body).await,
        }
    }

    async fn link(&self, path: &str, expire: Duration) -> Result<String> {
        match self {
            Backend::Local(b) => b.link(path, expire).await,
            Backend::S3(b) => b.link(path, expire).await,
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self {
            Backend::Local(b) => b.delete(path).await,
            Backend::S3(b) => b.delete(path).await,
        }
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        match self {
            Backend::Local(b) => b.stat(path).await,
            Backend::S3(b) => b.stat(path).await,
        }
    }
}
