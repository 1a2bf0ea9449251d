//! Copy pipeline tests against an in-memory object store that records every
//! backend call.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use storage_kit::copy::{
    complete, CompletedPart, CopyPlan, CopyPolicy, MultipartCopier, PartRange, UploadSession,
};
use storage_kit::{copy_object, CopyOutcome, ObjectRef, Result, Stage, StorageError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Probe,
    Direct,
    Begin,
    CopyPart(u32),
    Complete(Vec<u32>),
}

#[derive(Default)]
struct Session {
    destination: Option<ObjectRef>,
    parts: BTreeMap<u32, (String, Bytes)>,
}

/// In-memory store that copies byte ranges for real so results can be
/// checked byte for byte.
#[derive(Default)]
struct SpyStore {
    objects: Mutex<HashMap<ObjectRef, Bytes>>,
    sessions: Mutex<HashMap<String, Session>>,
    calls: Mutex<Vec<Call>>,
    fail_part: Mutex<Option<u32>>,
    fail_complete: Mutex<bool>,
    /// Cancels the token when this part starts, then never finishes the part.
    hang_on_part: Mutex<Option<(u32, CancellationToken)>>,
    /// Cancels the token while copying this part, then finishes the part.
    cancel_on_part: Mutex<Option<(u32, CancellationToken)>>,
    /// Cancels the token right after the destination is written, before the
    /// commit request returns.
    cancel_after_commit: Mutex<Option<CancellationToken>>,
    next_session: AtomicU64,
}

impl SpyStore {
    fn with_object(object: &ObjectRef, data: Vec<u8>) -> Self {
        let store = Self::default();
        store.objects.lock().insert(object.clone(), Bytes::from(data));
        store
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn object(&self, object: &ObjectRef) -> Option<Bytes> {
        self.objects.lock().get(object).cloned()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    async fn commit(&self, dst: &ObjectRef, data: Bytes) {
        self.objects.lock().insert(dst.clone(), data);
        let token = self.cancel_after_commit.lock().clone();
        if let Some(token) = token {
            token.cancel();
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl MultipartCopier for SpyStore {
    async fn probe_length(&self, object: &ObjectRef) -> Result<u64> {
        self.record(Call::Probe);
        self.object(object)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound {
                key: object.to_string(),
            })
    }

    async fn direct_copy(&self, src: &ObjectRef, dst: &ObjectRef) -> Result<()> {
        self.record(Call::Direct);
        let data = self.object(src).ok_or_else(|| StorageError::NotFound { key: src.to_string() })?;
        self.commit(dst, data).await;
        Ok(())
    }

    async fn begin_multipart(&self, dst: &ObjectRef) -> Result<UploadSession> {
        self.record(Call::Begin);
        let id = format!("upload-{}", self.next_session.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().insert(
            id.clone(),
            Session {
                destination: Some(dst.clone()),
                parts: BTreeMap::new(),
            },
        );
        Ok(UploadSession::new(id, dst.clone()))
    }

    async fn copy_part(&self, session: &UploadSession, src: &ObjectRef, range: &PartRange) -> Result<String> {
        self.record(Call::CopyPart(range.index));

        let hang = self.hang_on_part.lock().clone();
        if let Some((index, token)) = hang {
            if index == range.index {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        let cancel_on = self.cancel_on_part.lock().clone();
        if let Some((index, token)) = cancel_on {
            if index == range.index {
                token.cancel();
            }
        }
        if *self.fail_part.lock() == Some(range.index) {
            return Err(StorageError::backend(Stage::CopyingParts, src.to_string(), "injected failure"));
        }

        let data = self.object(src).ok_or_else(|| StorageError::NotFound { key: src.to_string() })?;
        let slice = data.slice(range.start as usize..=range.end as usize);
        let tag = format!("etag-{}-{}", range.index, slice.len());
        self.sessions
            .lock()
            .get_mut(session.upload_id())
            .ok_or_else(|| StorageError::backend(Stage::CopyingParts, src.to_string(), "no such upload"))?
            .parts
            .insert(range.index, (tag.clone(), slice));
        Ok(tag)
    }

    async fn complete_multipart(&self, session: UploadSession, parts: &[CompletedPart]) -> Result<()> {
        self.record(Call::Complete(parts.iter().map(|p| p.index).collect()));
        if *self.fail_complete.lock() {
            return Err(StorageError::backend(
                Stage::Completing,
                session.destination().to_string(),
                "InvalidPart",
            ));
        }

        let stored = self
            .sessions
            .lock()
            .remove(session.upload_id())
            .ok_or_else(|| StorageError::backend(Stage::Completing, session.upload_id(), "no such upload"))?;
        let mut assembled = Vec::new();
        for part in parts {
            let (tag, data) = stored
                .parts
                .get(&part.index)
                .ok_or_else(|| StorageError::backend(Stage::Completing, session.upload_id(), "missing part"))?;
            if *tag != part.tag {
                return Err(StorageError::backend(Stage::Completing, session.upload_id(), "tag mismatch"));
            }
            assembled.extend_from_slice(data);
        }
        let destination = stored.destination.unwrap_or_else(|| session.destination().clone());
        self.commit(&destination, Bytes::from(assembled)).await;
        Ok(())
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Threshold 16 bytes, parts of 8 bytes, at most 100 parts.
fn small_policy() -> CopyPolicy {
    CopyPolicy {
        max_single_copy_bytes: 16,
        max_part_bytes: 8,
        max_parts: 100,
        part_concurrency: 1,
    }
}

fn refs() -> (ObjectRef, ObjectRef) {
    (ObjectRef::new("src", "/data/in.bin"), ObjectRef::new("dst", "data/out.bin"))
}

#[tokio::test]
async fn test_zero_length_copies_directly() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, vec![]);

    let outcome = copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CopyOutcome::Direct { length: 0 });
    assert_eq!(store.calls(), vec![Call::Probe, Call::Direct]);
    assert_eq!(store.object(&dst).unwrap().len(), 0);
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(16));

    let outcome = copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CopyOutcome::Direct { length: 16 });
    assert!(!store.calls().contains(&Call::Begin));
    assert_eq!(store.object(&dst), store.object(&src));
}

#[tokio::test]
async fn test_one_past_threshold_goes_multipart() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(17));

    let outcome = copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CopyOutcome::Multipart { length: 17, parts: 3 });
    assert_eq!(
        store.calls(),
        vec![
            Call::Probe,
            Call::Begin,
            Call::CopyPart(1),
            Call::CopyPart(2),
            Call::CopyPart(3),
            Call::Complete(vec![1, 2, 3]),
        ]
    );
    assert_eq!(store.object(&dst), store.object(&src));
}

#[tokio::test]
async fn test_exact_multiple_of_part_size() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(80));

    let outcome = copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CopyOutcome::Multipart { length: 80, parts: 10 });
    let completed: Vec<_> = store
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Complete(indices) => Some(indices),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![(1..=10).collect::<Vec<u32>>()]);
    assert_eq!(store.object(&dst).unwrap().len(), 80);
}

#[tokio::test]
async fn test_failed_part_stops_and_never_completes() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(20));
    *store.fail_part.lock() = Some(2);

    let err = copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Backend { stage: Stage::CopyingParts, .. }), "{err}");
    assert_eq!(
        store.calls(),
        vec![Call::Probe, Call::Begin, Call::CopyPart(1), Call::CopyPart(2)]
    );
    assert!(store.object(&dst).is_none());
    assert_eq!(store.object(&src).unwrap(), Bytes::from(pattern(20)));
}

#[tokio::test]
async fn test_rerun_after_failure_produces_identical_copy() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(41));
    *store.fail_part.lock() = Some(3);
    assert!(copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .is_err());

    *store.fail_part.lock() = None;
    let outcome = copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CopyOutcome::Multipart { length: 41, parts: 6 });
    assert_eq!(store.object(&dst), store.object(&src));
    // The abandoned session from the first run is still open.
    assert_eq!(store.sessions.lock().len(), 1);
}

#[tokio::test]
async fn test_missing_source() {
    let (src, dst) = refs();
    let store = SpyStore::default();

    let err = copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(store.calls(), vec![Call::Probe]);
}

#[tokio::test]
async fn test_plan_too_large_opens_no_session() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(100));
    let policy = CopyPolicy {
        max_parts: 4,
        ..small_policy()
    };

    let err = copy_object(&store, &src, &dst, &policy, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StorageError::PlanTooLarge {
            length: 100,
            parts: 13,
            max_parts: 4
        }
    ));
    assert_eq!(err.stage(), Some(Stage::Planning));
    assert_eq!(store.calls(), vec![Call::Probe]);
}

#[tokio::test]
async fn test_rejected_completion_leaves_no_destination() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(24));
    *store.fail_complete.lock() = true;

    let err = copy_object(&store, &src, &dst, &small_policy(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Completing));
    assert!(store.object(&dst).is_none());
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(40));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = copy_object(&store, &src, &dst, &small_policy(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Cancelled { stage: Stage::Probing }));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_during_part_never_completes() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(40));
    let cancel = CancellationToken::new();
    *store.hang_on_part.lock() = Some((2, cancel.clone()));

    let err = copy_object(&store, &src, &dst, &small_policy(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Cancelled { stage: Stage::CopyingParts }));
    assert_eq!(
        store.calls(),
        vec![Call::Probe, Call::Begin, Call::CopyPart(1), Call::CopyPart(2)]
    );
    assert!(store.object(&dst).is_none());
}

#[tokio::test]
async fn test_cancel_during_last_part_skips_completion() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(40));
    let cancel = CancellationToken::new();
    *store.cancel_on_part.lock() = Some((5, cancel.clone()));

    let err = copy_object(&store, &src, &dst, &small_policy(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Cancelled { stage: Stage::Completing }));
    assert_eq!(store.calls().last(), Some(&Call::CopyPart(5)));
    assert!(store.object(&dst).is_none());
}

#[tokio::test]
async fn test_cancel_during_completion_reports_success() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(40));
    let cancel = CancellationToken::new();
    *store.cancel_after_commit.lock() = Some(cancel.clone());

    let outcome = copy_object(&store, &src, &dst, &small_policy(), &cancel)
        .await
        .unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(outcome, CopyOutcome::Multipart { length: 40, parts: 5 });
    assert_eq!(store.object(&dst), store.object(&src));
}

#[tokio::test]
async fn test_cancel_during_direct_copy_reports_success() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(12));
    let cancel = CancellationToken::new();
    *store.cancel_after_commit.lock() = Some(cancel.clone());

    let outcome = copy_object(&store, &src, &dst, &small_policy(), &cancel)
        .await
        .unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(outcome, CopyOutcome::Direct { length: 12 });
    assert_eq!(store.object(&dst), store.object(&src));
}

#[tokio::test]
async fn test_concurrent_parts_complete_in_order() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(75));
    let policy = small_policy().with_part_concurrency(4);

    let outcome = copy_object(&store, &src, &dst, &policy, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CopyOutcome::Multipart { length: 75, parts: 10 });
    assert!(store
        .calls()
        .contains(&Call::Complete((1..=10).collect())));
    assert_eq!(store.object(&dst), store.object(&src));
}

#[tokio::test]
async fn test_concurrent_failure_never_completes() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(75));
    *store.fail_part.lock() = Some(5);
    let policy = small_policy().with_part_concurrency(3);

    let err = copy_object(&store, &src, &dst, &policy, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::CopyingParts));
    assert!(!store.calls().iter().any(|c| matches!(c, Call::Complete(_))));
    assert!(store.object(&dst).is_none());
}

#[tokio::test]
async fn test_complete_rejects_gaps_before_calling_backend() {
    let (src, dst) = refs();
    let store = SpyStore::with_object(&src, pattern(24));
    let session = store.begin_multipart(&dst).await.unwrap();

    let parts = vec![CompletedPart::new(1, "a"), CompletedPart::new(3, "c")];
    let err = complete(&store, session, parts).await.unwrap_err();

    assert!(matches!(err, StorageError::InvalidArgument { .. }));
    assert!(!store.calls().iter().any(|c| matches!(c, Call::Complete(_))));
}

#[tokio::test]
async fn test_plan_feeds_part_ranges() {
    let plan = CopyPlan::new(20, 8, 10).unwrap();
    let ranges: Vec<String> = plan.parts().iter().map(PartRange::http_range).collect();
    assert_eq!(ranges, vec!["bytes=0-7", "bytes=8-15", "bytes=16-19"]);
}
