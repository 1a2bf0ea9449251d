//! Part copy orchestration and completion.

use futures::{stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CompletedPart, CopyPlan, MultipartCopier, PartRange, UploadSession};
use crate::error::{Result, Stage, StorageError};
use crate::object_ref::ObjectRef;

/// Runs `fut` unless `cancel` fires first. A token that is already cancelled
/// wins without polling `fut`.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, stage: Stage, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled { stage }),
        res = fut => res,
    }
}

/// Fails with `Cancelled` if `cancel` has already fired.
///
/// Used in front of requests that commit the destination: once such a
/// request is sent it is awaited to the end, cancelled or not.
pub(crate) fn ensure_live(cancel: &CancellationToken, stage: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(StorageError::Cancelled { stage });
    }
    Ok(())
}

async fn copy_one<C>(
    client: &C,
    session: &UploadSession,
    source: &ObjectRef,
    range: &PartRange,
    cancel: &CancellationToken,
) -> Result<CompletedPart>
where
    C: MultipartCopier + ?Sized,
{
    let tag = cancellable(cancel, Stage::CopyingParts, client.copy_part(session, source, range))
        .await
        .map_err(|e| e.at_stage(Stage::CopyingParts))?;
    debug!(
        upload_id = session.upload_id(),
        part = range.index,
        bytes = range.byte_count(),
        "copied part"
    );
    Ok(CompletedPart::new(range.index, tag))
}

/// Copies every part of `plan` into `session`.
///
/// Parts are returned in plan order. The first failure stops the run: no
/// further parts are started, parts already in flight are dropped and the
/// error is returned unchanged apart from its stage.
pub async fn copy_parts<C>(
    client: &C,
    session: &UploadSession,
    source: &ObjectRef,
    plan: &CopyPlan,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<Vec<CompletedPart>>
where
    C: MultipartCopier + ?Sized,
{
    let result: Result<Vec<CompletedPart>> = if concurrency <= 1 {
        async {
            let mut completed = Vec::with_capacity(plan.len());
            for range in plan {
                completed.push(copy_one(client, session, source, range, cancel).await?);
            }
            Ok::<_, StorageError>(completed)
        }
        .await
    } else {
        // `buffered` yields in input order, so no re-sorting is needed.
        stream::iter(plan.parts().iter().copied())
            .map(move |range| async move { copy_one(client, session, source, &range, cancel).await })
            .buffered(concurrency)
            .try_collect()
            .await
    };

    if let Err(err) = &result {
        warn!(
            upload_id = session.upload_id(),
            destination = %session.destination(),
            error = %err,
            "part copy failed, abandoning upload session"
        );
    }
    result
}

/// Submits the ordered part list and consumes the session.
pub async fn complete<C>(client: &C, session: UploadSession, parts: Vec<CompletedPart>) -> Result<()>
where
    C: MultipartCopier + ?Sized,
{
    if let Some((position, part)) = parts
        .iter()
        .enumerate()
        .find(|(position, part)| part.index as usize != position + 1)
    {
        return Err(StorageError::InvalidArgument {
            reason: format!(
                "part {} at position {} breaks the 1..=n ordering",
                part.index,
                position + 1
            ),
        });
    }

    let upload_id = session.upload_id().to_string();
    client
        .complete_multipart(session, &parts)
        .await
        .map_err(|e| e.at_stage(Stage::Completing))?;
    debug!(upload_id = %upload_id, parts = parts.len(), "completed multipart upload");
    Ok(())
}
