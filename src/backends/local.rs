//! Local filesystem backend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use chrono::DateTime;
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::backends::common::Storage;
use crate::error::{Result, StorageError};
use crate::object_ref::normalize_key;
use crate::{CopyOptions, FileInfo, ListOptions, ObjectFile, ObjectStream};

/// Permission bits of copies when the caller does not pick any.
pub const DEFAULT_COPY_MODE: u32 = 0o644;

/// Filesystem volume rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

fn io_error(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound { key: key.to_string() }
    } else {
        StorageError::Io(err)
    }
}

fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(StorageError::EmptyPath);
    }
    Ok(root.join(normalize_key(path)))
}

async fn ensure_parent(loc: &Path) -> Result<()> {
    if let Some(dir) = loc.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(())
}

/// Sibling of `loc` the copy is written to before being renamed into place.
fn staging_path(loc: &Path) -> PathBuf {
    let name = loc
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    loc.with_file_name(format!(".{name}.partial"))
}

impl LocalBackend {
    /// Volume rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Volume root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        resolve(&self.root, path)
    }

    /// Key of `path` relative to the volume, with `/` separators.
    fn relative_key(root: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
        Some(parts.join("/"))
    }
}

#[async_trait::async_trait]
impl Storage for LocalBackend {
    async fn list(&self, path: &str, _options: &ListOptions) -> Result<Vec<String>> {
        let dir = self.full_path(path)?;
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| io_error(path, e))?;
        let mut names = vec![];
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn walk(&self, path: &str, callback: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> Result<()> {
        let loc = self.full_path(path)?;
        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || {
            WalkDir::new(&loc)
                .follow_links(false)
                .into_iter()
                // Unreadable entries are skipped, not fatal.
                .filter_map(|e| e.ok())
                .filter(|entry| !entry.file_type().is_dir())
                .filter_map(|entry| Self::relative_key(&root, entry.path()))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::new(ErrorKind::Other, e)))?;

        for key in &keys {
            callback(key);
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self, options), fields(root = %self.root.display()))]
    async fn copy(&self, src: &str, dst: &str, options: &CopyOptions) -> Result<()> {
        let from = self.full_path(src)?;
        let to = match &options.destination_container {
            Some(volume) => resolve(Path::new(volume), dst)?,
            None => self.full_path(dst)?,
        };

        tokio::fs::metadata(&from).await.map_err(|e| io_error(src, e))?;
        ensure_parent(&to).await?;

        let staging = staging_path(&to);
        let mode = options.mode.unwrap_or(DEFAULT_COPY_MODE);
        let result = async {
            let bytes = tokio::fs::copy(&from, &staging).await?;
            set_mode(&staging, mode).await?;
            tokio::fs::rename(&staging, &to).await?;
            Ok::<_, std::io::Error>(bytes)
        }
        .await;

        match result {
            Ok(bytes) => {
                debug!(bytes, "copied file");
                Ok(())
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&staging).await;
                Err(StorageError::Io(err))
            }
        }
    }

    async fn create(&self, path: &str) -> Result<Box<dyn ObjectFile>> {
        let loc = self.full_path(path)?;
        ensure_parent(&loc).await?;
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&loc)
            .await?;
        Ok(Box::new(file))
    }

    async fn get(&self, path: &str) -> Result<ObjectStream> {
        let loc = self.full_path(path)?;
        let file = tokio::fs::File::open(&loc).await.map_err(|e| io_error(path, e))?;
        Ok(Box::pin(ReaderStream::new(file).map_err(StorageError::from)))
    }

    /// Streams `body` into a staging file and renames it over `path` only
    /// once the stream has ended cleanly.
    async fn put(&self, path: &str, mut body: ObjectStream) -> Result<()> {
        let loc = self.full_path(path)?;
        ensure_parent(&loc).await?;

        let staging = staging_path(&loc);
        let result = async {
            let mut file = tokio::fs::File::create(&staging).await?;
            while let Some(chunk) = body.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&staging, &loc).await?;
            Ok::<_, StorageError>(())
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        result
    }

    async fn link(&self, path: &str, _expire: Duration) -> Result<String> {
        let loc = self.full_path(path)?;
        Ok(loc.to_string_lossy().into_owned())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let loc = self.full_path(path)?;
        tokio::fs::remove_file(&loc).await.map_err(|e| io_error(path, e))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let loc = self.full_path(path)?;
        let meta = tokio::fs::metadata(&loc).await.map_err(|e| io_error(path, e))?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()));
        Ok(FileInfo {
            key: normalize_key(path).to_string(),
            size: meta.len(),
            mode: file_mode(&meta),
            last_modified,
            etag: None,
            content_type: None,
        })
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_path_rejected() {
        let backend = LocalBackend::new("/vol");
        assert!(matches!(backend.full_path(""), Err(StorageError::EmptyPath)));
    }

    #[test]
    fn test_leading_separator_is_stripped() {
        let backend = LocalBackend::new("/vol");
        assert_eq!(backend.full_path("/a/b.txt").unwrap(), PathBuf::from("/vol/a/b.txt"));
        assert_eq!(backend.full_path("a").unwrap(), PathBuf::from("/vol/a"));
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("/vol/dir/file.bin")),
            PathBuf::from("/vol/dir/.file.bin.partial")
        );
    }

    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let key = LocalBackend::relative_key(Path::new("/vol"), Path::new("/vol/a/b/c.txt"));
        assert_eq!(key.as_deref(), Some("a/b/c.txt"));
    }
}
