//! The capability contract every backend implements.

use std::time::Duration;

use crate::{CopyOptions, FileInfo, ListOptions, ObjectFile, ObjectStream, Result};

#[async_trait::async_trait]
/// Capability contract shared by every backend.
///
/// Paths are keys relative to the backend's volume or bucket; a single
/// leading `/` is ignored.
pub trait Storage: Send + Sync {
    /// Names directly under `path`.
    async fn list(&self, path: &str, options: &ListOptions) -> Result<Vec<String>>;

    /// Calls `callback` with the key of every file below `path`.
    async fn walk(&self, path: &str, callback: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> Result<()>;

    /// Copies `src` to `dst`. The destination is either complete or absent
    /// when this returns.
    async fn copy(&self, src: &str, dst: &str, options: &CopyOptions) -> Result<()>;

    /// Creates the object (truncating an existing one) and returns a handle to it.
    async fn create(&self, path: &str) -> Result<Box<dyn ObjectFile>>;

    /// Gets a stream of object bytes.
    async fn get(&self, path: &str) -> Result<ObjectStream>;

    /// Writes the object from a byte stream.
    async fn put(&self, path: &str, body: ObjectStream) -> Result<()>;

    /// Location a client can download the object from, valid for `expire`.
    async fn link(&self, path: &str, expire: Duration) -> Result<String>;

    /// Deletes an object.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Size and metadata of an object.
    async fn stat(&self, path: &str) -> Result<FileInfo>;
}
