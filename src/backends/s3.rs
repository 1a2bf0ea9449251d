//! S3 backend.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::{HeadObjectError, HeadObjectOutput};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::{Bytes, BytesMut};
use chrono::DateTime;
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::backends::common::Storage;
use crate::copy::{copy_object, CompletedPart, CopyOutcome, CopyPolicy, MultipartCopier, PartRange, UploadSession};
use crate::error::{Result, Stage, StorageError};
use crate::object_ref::{normalize_key, ObjectRef};
use crate::{CopyOptions, FileInfo, ListOptions, ObjectFile, ObjectStream};

/// Part size for streamed puts (10 MiB).
pub const PUT_PART_BYTES: usize = 10 * 1024 * 1024;

/// One bucket of an S3-compatible object store.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Arc<S3Client>,
    bucket: String,
    policy: CopyPolicy,
}

fn sdk_error<E, R>(stage: Stage, key: &str, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    StorageError::Backend {
        stage,
        key: key.to_string(),
        message: DisplayErrorContext(&err).to_string(),
        source: Some(Box::new(err)),
    }
}

fn head_error<R>(stage: Stage, key: &str, err: SdkError<HeadObjectError, R>) -> StorageError
where
    R: Debug + Send + Sync + 'static,
{
    if err.as_service_error().is_some_and(|e| e.is_not_found()) {
        StorageError::NotFound { key: key.to_string() }
    } else {
        sdk_error(stage, key, err)
    }
}

fn get_error<R>(key: &str, err: SdkError<GetObjectError, R>) -> StorageError
where
    R: Debug + Send + Sync + 'static,
{
    if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
        StorageError::NotFound { key: key.to_string() }
    } else {
        sdk_error(Stage::Get, key, err)
    }
}

/// Last path segment of a common prefix: `a/b/` -> `b`.
fn base_name(prefix: &str) -> &str {
    let trimmed = prefix.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Records the first segment of `key` below `prefix`, once. Listings are
/// sorted, so repeats of a folder are adjacent.
fn push_top_level(names: &mut Vec<String>, prefix: &str, key: &str) {
    let rel = key.strip_prefix(prefix).unwrap_or(key).trim_start_matches('/');
    let Some(first) = rel.split('/').next().filter(|s| !s.is_empty()) else {
        return;
    };
    if names.last().map(String::as_str) != Some(first) {
        names.push(first.to_string());
    }
}

fn file_info(key: &str, head: &HeadObjectOutput) -> FileInfo {
    FileInfo {
        key: key.to_string(),
        size: head
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or(0),
        mode: None,
        last_modified: head
            .last_modified()
            .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
        etag: head.e_tag().map(str::to_string),
        content_type: head.content_type().map(str::to_string),
    }
}

impl S3Backend {
    /// Backend for `bucket` with the default S3 copy limits.
    pub fn new(client: Arc<S3Client>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            policy: CopyPolicy::default(),
        }
    }

    /// Replaces the copy limits, e.g. for S3-compatible stores with smaller ones.
    pub fn with_policy(mut self, policy: CopyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bucket all keys are relative to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Copy limits in use.
    pub fn policy(&self) -> &CopyPolicy {
        &self.policy
    }

    /// [`Storage::copy`] with a cancellation token. Cancelling stops the copy
    /// before its next request; a completion already sent is awaited.
    pub async fn copy_cancellable(
        &self,
        src: &str,
        dst: &str,
        options: &CopyOptions,
        cancel: &CancellationToken,
    ) -> Result<CopyOutcome> {
        let source = ObjectRef::new(self.bucket.as_str(), src);
        let destination = ObjectRef::new(
            options.destination_container.as_deref().unwrap_or(self.bucket.as_str()),
            dst,
        );
        copy_object(self, &source, &destination, &self.policy, cancel).await
    }

    async fn list_pages(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        stage: Stage,
        mut on_page: impl FnMut(&aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output) + Send,
    ) -> Result<()> {
        let mut continuation_token: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(delimiter) = delimiter {
                req = req.delimiter(delimiter);
            }
            if let Some(token) = continuation_token.take() {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|e| sdk_error(stage, prefix, e))?;
            on_page(&resp);
            continuation_token = resp.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }
        Ok(())
    }

    async fn upload_part(&self, key: &str, upload_id: &str, part_number: i32, data: Bytes) -> Result<S3CompletedPart> {
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_error(Stage::Put, key, e))?;
        Ok(S3CompletedPart::builder()
            .set_e_tag(resp.e_tag().map(str::to_string))
            .part_number(part_number)
            .build())
    }
}

#[async_trait]
impl MultipartCopier for S3Backend {
    async fn probe_length(&self, object: &ObjectRef) -> Result<u64> {
        let name = object.to_string();
        let head = self
            .client
            .head_object()
            .bucket(object.container())
            .key(object.key())
            .send()
            .await
            .map_err(|e| head_error(Stage::Probing, &name, e))?;
        let length = head
            .content_length()
            .ok_or_else(|| StorageError::backend(Stage::Probing, &name, "response has no Content-Length"))?;
        u64::try_from(length)
            .map_err(|_| StorageError::backend(Stage::Probing, &name, format!("negative Content-Length {length}")))
    }

    async fn direct_copy(&self, src: &ObjectRef, dst: &ObjectRef) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(src.copy_source())
            .bucket(dst.container())
            .key(dst.key())
            .send()
            .await
            .map_err(|e| sdk_error(Stage::DirectCopy, &dst.to_string(), e))?;
        Ok(())
    }

    async fn begin_multipart(&self, dst: &ObjectRef) -> Result<UploadSession> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(dst.container())
            .key(dst.key())
            .send()
            .await
            .map_err(|e| sdk_error(Stage::CopyingParts, &dst.to_string(), e))?;
        let upload_id = resp
            .upload_id()
            .ok_or_else(|| StorageError::backend(Stage::CopyingParts, dst.to_string(), "response has no UploadId"))?;
        Ok(UploadSession::new(upload_id, dst.clone()))
    }

    async fn copy_part(&self, session: &UploadSession, src: &ObjectRef, range: &PartRange) -> Result<String> {
        let dst = session.destination();
        let part_number = i32::try_from(range.index).map_err(|_| StorageError::InvalidArgument {
            reason: format!("part number {} does not fit the protocol", range.index),
        })?;
        let resp = self
            .client
            .upload_part_copy()
            .bucket(dst.container())
            .key(dst.key())
            .copy_source(src.copy_source())
            .copy_source_range(range.http_range())
            .part_number(part_number)
            .upload_id(session.upload_id())
            .send()
            .await
            .map_err(|e| sdk_error(Stage::CopyingParts, &dst.to_string(), e))?;
        resp.copy_part_result()
            .and_then(|r| r.e_tag())
            .map(str::to_string)
            .ok_or_else(|| {
                StorageError::backend(
                    Stage::CopyingParts,
                    dst.to_string(),
                    format!("part {} response has no ETag", range.index),
                )
            })
    }

    async fn complete_multipart(&self, session: UploadSession, parts: &[CompletedPart]) -> Result<()> {
        let dst = session.destination();
        let completed = parts
            .iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .e_tag(p.tag.as_str())
                    .part_number(p.index as i32)
                    .build()
            })
            .collect::<Vec<_>>();
        self.client
            .complete_multipart_upload()
            .bucket(dst.container())
            .key(dst.key())
            .upload_id(session.upload_id())
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(completed)).build())
            .send()
            .await
            .map_err(|e| sdk_error(Stage::Completing, &dst.to_string(), e))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for S3Backend {
    async fn list(&self, path: &str, options: &ListOptions) -> Result<Vec<String>> {
        let prefix = normalize_key(path);
        let delimiter = options.delimiter.as_deref();
        let mut names = vec![];
        self.list_pages(prefix, delimiter, Stage::List, |page| {
            if delimiter.is_some() {
                names.extend(
                    page.common_prefixes()
                        .iter()
                        .filter_map(|p| p.prefix())
                        .map(|p| base_name(p).to_string()),
                );
            } else {
                for key in page.contents().iter().filter_map(|o| o.key()) {
                    push_top_level(&mut names, prefix, key);
                }
            }
        })
        .await?;
        Ok(names)
    }

    async fn walk(&self, path: &str, callback: &mut (dyn for<'a> FnMut(&'a str) + Send)) -> Result<()> {
        let prefix = normalize_key(path);
        self.list_pages(prefix, None, Stage::Walk, |page| {
            for key in page.contents().iter().filter_map(|o| o.key()) {
                callback(key);
            }
        })
        .await
    }

    #[instrument(level = "debug", skip(self, options), fields(bucket = %self.bucket))]
    async fn copy(&self, src: &str, dst: &str, options: &CopyOptions) -> Result<()> {
        self.copy_cancellable(src, dst, options, &CancellationToken::new())
            .await
            .map(|_| ())
    }

    async fn create(&self, _path: &str) -> Result<Box<dyn ObjectFile>> {
        Err(StorageError::Unsupported {
            operation: "create",
            backend: "s3",
        })
    }

    async fn get(&self, path: &str) -> Result<ObjectStream> {
        let key = normalize_key(path);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| get_error(key, e))?;
        Ok(Box::pin(
            ReaderStream::new(resp.body.into_async_read()).map_err(StorageError::from),
        ))
    }

    #[instrument(level = "debug", skip(self, body), fields(bucket = %self.bucket))]
    async fn put(&self, path: &str, mut body: ObjectStream) -> Result<()> {
        let key = normalize_key(path);
        let mut buffer = BytesMut::new();
        let mut upload_id: Option<String> = None;
        let mut parts = vec![];

        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
            while buffer.len() >= PUT_PART_BYTES {
                let data = buffer.split_to(PUT_PART_BYTES).freeze();
                if upload_id.is_none() {
                    let resp = self
                        .client
                        .create_multipart_upload()
                        .bucket(&self.bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(|e| sdk_error(Stage::Put, key, e))?;
                    let id = resp
                        .upload_id()
                        .ok_or_else(|| StorageError::backend(Stage::Put, key, "response has no UploadId"))?;
                    upload_id = Some(id.to_string());
                }
                if let Some(id) = upload_id.as_deref() {
                    let part_number = parts.len() as i32 + 1;
                    parts.push(self.upload_part(key, id, part_number, data).await?);
                }
            }
        }

        let Some(upload_id) = upload_id else {
            let size = buffer.len();
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(buffer.freeze()))
                .send()
                .await
                .map_err(|e| sdk_error(Stage::Put, key, e))?;
            debug!(size, "put object");
            return Ok(());
        };

        if !buffer.is_empty() {
            let part_number = parts.len() as i32 + 1;
            parts.push(self.upload_part(key, &upload_id, part_number, buffer.freeze()).await?);
        }
        let part_count = parts.len();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| sdk_error(Stage::Put, key, e))?;
        debug!(parts = part_count, "put object in parts");
        Ok(())
    }

    async fn link(&self, path: &str, expire: Duration) -> Result<String> {
        let key = normalize_key(path);
        let config = PresigningConfig::expires_in(expire).map_err(|e| StorageError::InvalidArgument {
            reason: format!("link expiry: {e}"),
        })?;
        let req = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| sdk_error(Stage::Link, key, e))?;
        Ok(req.uri().to_string())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = normalize_key(path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(Stage::Delete, key, e))?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let key = normalize_key(path);
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| head_error(Stage::Stat, key, e))?;
        Ok(file_info(key, &head))
    }
}
