use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::parts::{cancellable, complete, copy_parts, ensure_live};
use super::{CopyPlan, CopyPolicy, MultipartCopier};
use crate::error::{Result, Stage};
use crate::object_ref::ObjectRef;

/// Which path a successful copy took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// One request copied the whole object.
    Direct {
        /// Bytes copied.
        length: u64,
    },
    /// The object was copied as `parts` byte ranges and assembled.
    Multipart {
        /// Bytes copied.
        length: u64,
        /// Parts assembled.
        parts: usize,
    },
}

impl CopyOutcome {
    /// Bytes copied.
    pub fn length(&self) -> u64 {
        match self {
            CopyOutcome::Direct { length } | CopyOutcome::Multipart { length, .. } => *length,
        }
    }
}

/// Copies `src` to `dst`, splitting into parts when the object is larger
/// than `policy.max_single_copy_bytes`.
///
/// Stages run `Probing → Planning → CopyingParts → Completing`; none is
/// re-entered and nothing is retried. Cancelling `cancel` drops a probe or
/// part copy in flight. The direct copy and the completion are only started
/// while `cancel` is live and, once started, run to the end, so the result
/// always says whether the destination was written.
#[instrument(level = "debug", skip_all, fields(src = %src, dst = %dst))]
pub async fn copy_object<C>(
    client: &C,
    src: &ObjectRef,
    dst: &ObjectRef,
    policy: &CopyPolicy,
    cancel: &CancellationToken,
) -> Result<CopyOutcome>
where
    C: MultipartCopier + ?Sized,
{
    let length = cancellable(cancel, Stage::Probing, client.probe_length(src))
        .await
        .map_err(|e| e.at_stage(Stage::Probing))?;

    if length <= policy.max_single_copy_bytes {
        debug!(length, "copying in a single request");
        ensure_live(cancel, Stage::DirectCopy)?;
        client
            .direct_copy(src, dst)
            .await
            .map_err(|e| e.at_stage(Stage::DirectCopy))?;
        info!(length, "copied object");
        return Ok(CopyOutcome::Direct { length });
    }

    let plan = CopyPlan::new(length, policy.max_part_bytes, policy.max_parts)?;
    debug!(length, parts = plan.len(), part_size = plan.part_size(), "planned multipart copy");

    let session = cancellable(cancel, Stage::CopyingParts, client.begin_multipart(dst))
        .await
        .map_err(|e| e.at_stage(Stage::CopyingParts))?;
    debug!(upload_id = session.upload_id(), "opened upload session");

    let parts = copy_parts(client, &session, src, &plan, policy.part_concurrency, cancel).await?;

    let upload_id = session.upload_id().to_string();
    if let Err(err) = ensure_live(cancel, Stage::Completing) {
        warn!(upload_id = %upload_id, "cancelled before completion, abandoning upload session");
        return Err(err);
    }
    if let Err(err) = complete(client, session, parts).await {
        warn!(upload_id = %upload_id, error = %err, "multipart copy not completed");
        return Err(err);
    }

    info!(length, parts = plan.len(), "copied object in parts");
    Ok(CopyOutcome::Multipart {
        length,
        parts: plan.len(),
    })
}
