//! Server-side copy with a multipart fallback for large objects.
//!
//! ```text
//! copy_object(src, dst)
//!     |
//!     +--> probe_length(src)
//!     |
//!     +--> len <= max_single_copy_bytes --> direct_copy(src, dst)
//!     |
//!     +--> CopyPlan::new(len) --> begin_multipart(dst)
//!                                    |
//!                                    v
//!                             copy_part(1..=n)  (fail-fast, in order)
//!                                    |
//!                                    v
//!                             complete_multipart(parts)
//! ```
//!
//! A failed or cancelled multipart copy never reaches `complete_multipart`,
//! so the destination is either whole or absent. The open upload session is
//! left to the backend's own expiry rules.

mod dispatch;
mod parts;
mod plan;

use async_trait::async_trait;

pub use dispatch::{copy_object, CopyOutcome};
pub use parts::{complete, copy_parts};
pub use plan::{CopyPlan, PartRange};

use crate::error::Result;
use crate::object_ref::ObjectRef;

/// Largest object S3 copies in a single `CopyObject` request (5 GiB).
pub const MAX_SINGLE_COPY_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Largest byte range a single `UploadPartCopy` accepts (5 GiB).
pub const MAX_PART_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Most parts S3 accepts in one multipart upload.
pub const MAX_UPLOAD_PARTS: u64 = 10_000;

/// Size limits and part parallelism for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyPolicy {
    /// Objects up to and including this length are copied in one request.
    pub max_single_copy_bytes: u64,
    /// Largest byte range copied as one part.
    pub max_part_bytes: u64,
    /// Most parts one upload session accepts.
    pub max_parts: u64,
    /// Part copies in flight at once. 1 copies strictly one after another.
    pub part_concurrency: usize,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self {
            max_single_copy_bytes: MAX_SINGLE_COPY_BYTES,
            max_part_bytes: MAX_PART_BYTES,
            max_parts: MAX_UPLOAD_PARTS,
            part_concurrency: 1,
        }
    }
}

impl CopyPolicy {
    /// Sets `part_concurrency`; values below 1 mean 1.
    pub fn with_part_concurrency(mut self, part_concurrency: usize) -> Self {
        self.part_concurrency = part_concurrency.max(1);
        self
    }
}

/// Backend-issued id correlating the part copies and the final completion of
/// one multipart copy.
///
/// Owned by the copy call that opened it and consumed by completion.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadSession {
    upload_id: String,
    destination: ObjectRef,
}

impl UploadSession {
    /// Session `upload_id` assembling into `destination`.
    pub fn new(upload_id: impl Into<String>, destination: ObjectRef) -> Self {
        Self {
            upload_id: upload_id.into(),
            destination,
        }
    }

    /// Backend-issued session id.
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Object the session assembles.
    pub fn destination(&self) -> &ObjectRef {
        &self.destination
    }
}

/// A copied part and the integrity tag (ETag) the backend returned for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub index: u32,
    /// Tag to echo back on completion.
    pub tag: String,
}

impl CompletedPart {
    /// Part `index` with its `tag`.
    pub fn new(index: u32, tag: impl Into<String>) -> Self {
        Self {
            index,
            tag: tag.into(),
        }
    }
}

/// Backend operations the copy pipeline drives.
///
/// Implementations issue one request per call and never retry.
#[async_trait]
pub trait MultipartCopier: Send + Sync {
    /// Length of `object` in bytes; [`StorageError::NotFound`] if missing.
    ///
    /// [`StorageError::NotFound`]: crate::StorageError::NotFound
    async fn probe_length(&self, object: &ObjectRef) -> Result<u64>;

    /// Copies `src` to `dst` in one request.
    async fn direct_copy(&self, src: &ObjectRef, dst: &ObjectRef) -> Result<()>;

    /// Opens an upload session targeting `dst`.
    async fn begin_multipart(&self, dst: &ObjectRef) -> Result<UploadSession>;

    /// Copies `range` of `src` into `session` and returns the part's tag.
    async fn copy_part(
        &self,
        session: &UploadSession,
        src: &ObjectRef,
        range: &PartRange,
    ) -> Result<String>;

    /// Assembles the destination from `parts`, which are ordered by index.
    async fn complete_multipart(&self, session: UploadSession, parts: &[CompletedPart]) -> Result<()>;
}
