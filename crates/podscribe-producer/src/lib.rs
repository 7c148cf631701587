//! Producer / Enqueuer (component G): a one-shot or periodic pass that
//! scans the object store for audio missing a transcript and enqueues it,
//! deduplicated against concurrent producer runs. Never mutates transcripts
//! or locks — safe to run concurrently with workers and with itself.

mod staging;

pub use staging::{claim_file, iter_local_audio, stage_local, StagingReport};

use podscribe_queue::Broker;
use podscribe_store::ObjectStore;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Store(#[from] podscribe_core::StoreError),
    #[error(transparent)]
    Broker(#[from] podscribe_core::BrokerError),
}

/// Result of one producer pass, returned as data (not just printed) so the
/// CLI can format it and tests can assert on it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    pub scanned: u64,
    pub enqueued: u64,
}

pub fn dedup_key(audio_key: &str) -> String {
    format!("queue:dedup:{audio_key}")
}

/// 1. List, filter by allowed audio suffix.
/// 2. Skip keys whose transcript already exists.
/// 3. Claim a dedup entry; on success, append to the stream.
/// 4. Report scanned and enqueued counts.
pub async fn run_producer(
    store: &dyn ObjectStore,
    broker: &dyn Broker,
    stream: &str,
    prefix: Option<&str>,
    dedup_ttl: Duration,
) -> Result<ProducerReport, ProducerError> {
    let keys = store.list(prefix).await?;
    let mut scanned = 0u64;
    let mut enqueued = 0u64;

    for key in keys {
        if !podscribe_core::is_audio_key(&key) {
            continue;
        }
        scanned += 1;

        let transcript_key = podscribe_core::transcript_key_for(&key);
        match store.head(&transcript_key).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "transcript existence check failed, skipping this pass");
                continue;
            }
        }

        let claimed = broker.set_if_absent(&dedup_key(&key), "1", dedup_ttl).await?;
        if !claimed {
            continue;
        }
        broker.append(stream, &key).await?;
        enqueued += 1;
    }

    Ok(ProducerReport { scanned, enqueued })
}

#[cfg(test)]
mod tests {
    use super::*;
    use podscribe_queue::InMemoryBroker;
    use podscribe_store::InMemoryObjectStore;

    async fn setup() -> (InMemoryObjectStore, InMemoryBroker) {
        let store = InMemoryObjectStore::new();
        let broker = InMemoryBroker::new();
        broker.ensure_group("s", "g").await.unwrap();
        (store, broker)
    }

    #[tokio::test]
    async fn enqueues_audio_missing_a_transcript() {
        let (store, broker) = setup().await;
        store.seed("p/e1/e1.mp3", b"audio".to_vec());
        store.seed("p/e2/e2.mp3", b"audio".to_vec());

        let report = run_producer(&store, &broker, "s", None, Duration::from_secs(86_400))
            .await
            .unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.enqueued, 2);
    }

    #[tokio::test]
    async fn skips_keys_with_an_existing_transcript() {
        let (store, broker) = setup().await;
        store.seed("p/e1/e1.mp3", b"audio".to_vec());
        store.seed("p/e1/e1.txt", b"already transcribed".to_vec());

        let report = run_producer(&store, &broker, "s", None, Duration::from_secs(86_400))
            .await
            .unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.enqueued, 0);
    }

    #[tokio::test]
    async fn non_audio_keys_are_not_counted_as_scanned() {
        let (store, broker) = setup().await;
        store.seed("p/readme.txt", b"notes".to_vec());

        let report = run_producer(&store, &broker, "s", None, Duration::from_secs(86_400))
            .await
            .unwrap();

        assert_eq!(report.scanned, 0);
        assert_eq!(report.enqueued, 0);
    }

    #[tokio::test]
    async fn concurrent_producer_runs_do_not_double_enqueue() {
        let (store, broker) = setup().await;
        store.seed("p/e1/e1.mp3", b"audio".to_vec());

        let first = run_producer(&store, &broker, "s", None, Duration::from_secs(86_400))
            .await
            .unwrap();
        let second = run_producer(&store, &broker, "s", None, Duration::from_secs(86_400))
            .await
            .unwrap();

        assert_eq!(first.enqueued, 1);
        assert_eq!(second.enqueued, 0, "dedup entry from the first run bounds the second");
    }
}
