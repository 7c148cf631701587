//! Job Lifecycle Controller (component E): per-message lock acquisition,
//! skip-if-done, download, transcribe, upload, ack, lock release.
//!
//! The sequence `lock-acquire -> download -> transcribe -> upload -> ack ->
//! lock-release` is strictly serial for a given message; across messages
//! there are no ordering guarantees, so every step here takes the single
//! [`podscribe_core::PrefetchEntry`] it owns and never touches another
//! entry's state.

use podscribe_cache::LocalCache;
use podscribe_core::{Delivery, ModelError, PrefetchEntry, StoreError, TranscriptionResult};
use podscribe_queue::Broker;
use podscribe_store::ObjectStore;
use std::time::Duration;
use uuid::Uuid;

/// Terminal (or short-circuiting) result of running one message through the
/// lifecycle. Drives both ack/no-ack decisions and structured log fields at
/// the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Transcript already existed; message acked without doing any work.
    AlreadyDone,
    /// Another worker holds the lock; message left un-acked for its peer.
    LockContended,
    Processed,
    DownloadFailed,
    ModelFailed,
    UploadFailed,
    /// Malformed message (no `key` field); acked and dead-lettered.
    Poison,
}

pub fn lock_key(transcript_key: &str) -> String {
    format!("lock:transcribe:{transcript_key}")
}

/// Step 1-2: skip if the transcript already exists, otherwise attempt the
/// processing lock. A store error on the existence check is treated as "not
/// done yet" rather than aborting the job — duplicate work is tolerated and
/// bounded by the lock, while blocking the pipeline on a transient read is
/// not.
pub async fn try_claim(
    broker: &dyn Broker,
    store: &dyn ObjectStore,
    cache: &LocalCache,
    lock_ttl: Duration,
    delivery: &Delivery,
) -> Result<PrefetchEntry, JobOutcome> {
    let key = &delivery.message.key;
    let transcript_key = podscribe_core::transcript_key_for(key);

    match store.head(&transcript_key).await {
        Ok(true) => return Err(JobOutcome::AlreadyDone),
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "transcript existence check failed, attempting lock anyway");
        }
    }

    let lock_token = Uuid::new_v4().to_string();
    let acquired = broker
        .set_if_absent(&lock_key(&transcript_key), &lock_token, lock_ttl)
        .await
        .map_err(|e| {
            tracing::warn!(key = %key, error = %e, "lock acquire failed");
            JobOutcome::LockContended
        })?;
    if !acquired {
        return Err(JobOutcome::LockContended);
    }

    Ok(PrefetchEntry::new(
        delivery.queue_id.clone(),
        key.clone(),
        transcript_key,
        lock_token,
        cache.audio_path(key),
        cache.output_path(key),
    ))
}

/// Step 3: download audio into the local cache, idempotently.
pub async fn download(store: &dyn ObjectStore, cache: &LocalCache, entry: &mut PrefetchEntry) -> Result<(), StoreError> {
    entry.mark_downloading();
    cache.download_if_needed(store, &entry.key, &entry.local_audio_path).await?;
    entry.mark_ready();
    Ok(())
}

/// Best-effort lock release. TTL is the authoritative safety net, so a
/// failure here is logged, not propagated.
pub async fn release_lock(broker: &dyn Broker, entry: &PrefetchEntry) {
    if let Err(e) = broker.delete(&lock_key(&entry.transcript_key)).await {
        tracing::warn!(key = %entry.key, error = %e, "lock release failed; ttl will reclaim");
    }
}

/// Steps 5-7: given a transcription result (success or per-file failure),
/// write and upload the output, ack, and release the lock.
pub async fn finalize(
    broker: &dyn Broker,
    store: &dyn ObjectStore,
    cache: &LocalCache,
    stream: &str,
    group: &str,
    entry: &mut PrefetchEntry,
    result: Result<TranscriptionResult, ModelError>,
) -> JobOutcome {
    let transcription = match result {
        Err(e) => {
            tracing::warn!(key = %entry.key, error = %e, "model failed");
            entry.mark_failed(e.to_string());
            release_lock(broker, entry).await;
            return JobOutcome::ModelFailed;
        }
        Ok(transcription) => transcription,
    };

    entry.mark_uploading();
    let text = transcription.to_plain_text();
    if let Err(e) = cache.write_output(&entry.key, &text).await {
        tracing::warn!(key = %entry.key, error = %e, "writing local output failed");
        entry.mark_failed(e.to_string());
        release_lock(broker, entry).await;
        return JobOutcome::UploadFailed;
    }

    // Skip the PUT if a previous attempt already uploaded this transcript
    // (crash after upload, before ack). A failed existence check is not
    // reason enough to abort: fall through and upload, same tolerance as
    // try_claim's existence check.
    let already_uploaded = match store.head(&entry.transcript_key).await {
        Ok(exists) => exists,
        Err(e) => {
            tracing::warn!(key = %entry.key, error = %e, "transcript existence check before upload failed, uploading anyway");
            false
        }
    };
    if already_uploaded {
        tracing::info!(key = %entry.key, "transcript already uploaded, skipping redundant put");
    } else if let Err(e) = store.put(&entry.transcript_key, &entry.local_output_path).await {
        tracing::warn!(key = %entry.key, error = %e, "upload failed");
        entry.mark_failed(e.to_string());
        release_lock(broker, entry).await;
        return JobOutcome::UploadFailed;
    }

    if let Err(e) = broker.ack(stream, group, &entry.queue_id).await {
        tracing::error!(
            key = %entry.key,
            error = %e,
            "ack failed after successful upload; redelivery will re-run a no-op upload"
        );
    }
    if let Err(e) = broker.incr("podcast:processed_count").await {
        tracing::warn!(key = %entry.key, error = %e, "failed to increment processed counter");
    }
    release_lock(broker, entry).await;
    entry.mark_done();
    JobOutcome::Processed
}

/// Single-file path (spec's "avoid pipeline overhead when only one message
/// was returned"): runs the full lifecycle for one delivery end to end.
#[allow(clippy::too_many_arguments)]
pub async fn process_message(
    broker: &dyn Broker,
    store: &dyn ObjectStore,
    cache: &LocalCache,
    model: &dyn podscribe_model::ModelRunner,
    stream: &str,
    group: &str,
    lock_ttl: Duration,
    delivery: &Delivery,
) -> JobOutcome {
    let mut entry = match try_claim(broker, store, cache, lock_ttl, delivery).await {
        Ok(entry) => entry,
        Err(JobOutcome::AlreadyDone) => {
            if let Err(e) = broker.ack(stream, group, &delivery.queue_id).await {
                tracing::warn!(key = %delivery.message.key, error = %e, "ack of already-done job failed");
            }
            return JobOutcome::AlreadyDone;
        }
        Err(outcome) => return outcome,
    };

    if let Err(e) = download(store, cache, &mut entry).await {
        tracing::warn!(key = %entry.key, error = %e, "download failed");
        entry.mark_failed(e.to_string());
        release_lock(broker, &entry).await;
        return JobOutcome::DownloadFailed;
    }

    entry.mark_transcribing();
    let result = model.transcribe_one(&entry.local_audio_path).await;
    finalize(broker, store, cache, stream, group, &mut entry, result).await
}

/// Ack and dead-letter a poison payload: never retried, never blocks the
/// stream.
pub async fn quarantine_poison(
    broker: &dyn Broker,
    stream: &str,
    group: &str,
    poison: &podscribe_core::PoisonPayload,
) -> podscribe_core::DeadLetterRecord {
    if let Err(e) = broker.ack(stream, group, &poison.queue_id).await {
        tracing::error!(queue_id = %poison.queue_id, error = %e, "failed to ack poison message; it will be redelivered");
    }
    tracing::warn!(queue_id = %poison.queue_id, reason = %poison.reason, "quarantined poison message");
    podscribe_core::DeadLetterRecord {
        queue_id: poison.queue_id.clone(),
        raw_payload: poison.raw_payload.clone(),
        reason: poison.reason.clone(),
        occurred_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podscribe_cache::LocalCache;
    use podscribe_core::parse_delivery;
    use podscribe_model::FakeModelRunner;
    use podscribe_queue::InMemoryBroker;
    use podscribe_store::InMemoryObjectStore;
    use std::collections::HashMap;

    async fn harness() -> (InMemoryBroker, InMemoryObjectStore, LocalCache, FakeModelRunner) {
        let broker = InMemoryBroker::new();
        broker.ensure_group("s", "g").await.unwrap();
        let store = InMemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap().into_path();
        let cache = LocalCache::new(dir).await.unwrap();
        (broker, store, cache, FakeModelRunner::new())
    }

    fn delivery(key: &str) -> Delivery {
        let mut fields = HashMap::new();
        fields.insert("key".to_string(), key.to_string());
        parse_delivery("1-0", &fields).unwrap()
    }

    #[tokio::test]
    async fn full_happy_path_produces_transcript_and_acks() {
        let (broker, store, cache, model) = harness().await;
        store.seed("p/e/e.mp3", b"audio bytes".to_vec());
        let delivery = delivery("p/e/e.mp3");

        let outcome = process_message(
            &broker,
            &store,
            &cache,
            &model,
            "s",
            "g",
            Duration::from_secs(60),
            &delivery,
        )
        .await;

        assert_eq!(outcome, JobOutcome::Processed);
        assert!(store.contents("p/e/e.txt").is_some());
        assert!(broker
            .set_if_absent("lock:transcribe:p/e/e.txt", "probe", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn already_done_short_circuits_and_acks() {
        let (broker, store, cache, model) = harness().await;
        store.seed("p/e/e.txt", b"existing transcript".to_vec());
        let delivery = delivery("p/e/e.mp3");

        let outcome = process_message(
            &broker,
            &store,
            &cache,
            &model,
            "s",
            "g",
            Duration::from_secs(60),
            &delivery,
        )
        .await;

        assert_eq!(outcome, JobOutcome::AlreadyDone);
    }

    #[tokio::test]
    async fn lock_contention_leaves_lock_and_message_untouched() {
        let (broker, store, cache, model) = harness().await;
        store.seed("p/e/e.mp3", b"audio".to_vec());
        broker
            .set_if_absent("lock:transcribe:p/e/e.txt", "someone-else", Duration::from_secs(60))
            .await
            .unwrap();
        let delivery = delivery("p/e/e.mp3");

        let outcome = process_message(
            &broker,
            &store,
            &cache,
            &model,
            "s",
            "g",
            Duration::from_secs(60),
            &delivery,
        )
        .await;

        assert_eq!(outcome, JobOutcome::LockContended);
    }

    #[tokio::test]
    async fn download_failure_releases_lock_without_ack() {
        let (broker, store, cache, model) = harness().await;
        // Nothing seeded: download will fail.
        let delivery = delivery("p/e/e.mp3");

        let outcome = process_message(
            &broker,
            &store,
            &cache,
            &model,
            "s",
            "g",
            Duration::from_secs(60),
            &delivery,
        )
        .await;

        assert_eq!(outcome, JobOutcome::DownloadFailed);
        assert!(broker
            .set_if_absent("lock:transcribe:p/e/e.txt", "probe", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn model_failure_releases_lock_without_ack() {
        let (broker, store, cache, model) = harness().await;
        store.seed("p/e/e.mp3", b"audio".to_vec());
        model.fail_path(cache.audio_path("p/e/e.mp3"));
        let delivery = delivery("p/e/e.mp3");

        let outcome = process_message(
            &broker,
            &store,
            &cache,
            &model,
            "s",
            "g",
            Duration::from_secs(60),
            &delivery,
        )
        .await;

        assert_eq!(outcome, JobOutcome::ModelFailed);
        assert!(broker
            .set_if_absent("lock:transcribe:p/e/e.txt", "probe", Duration::from_secs(1))
            .await
            .unwrap());
    }
}
