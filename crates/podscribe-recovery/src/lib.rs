//! Recovery Loop (component H): runs inside each worker process on a
//! coarse timer, reclaiming messages idle beyond `RECLAIM_IDLE_MS` in this
//! consumer group and re-running them through the standard lifecycle.
//!
//! A message's state as seen by the group: `Delivered -> Ack` (happy path)
//! or `Delivered -> (consumer dies) -> Pending -> Reclaimed -> Delivered ->
//! ...`, bounded by `MAX_DELIVERIES`: beyond that it is quarantined as
//! poison instead of reclaimed again, so a permanently-failing job cannot
//! loop forever.

use podscribe_cache::LocalCache;
use podscribe_core::{Config, DeadLetterRecord};
use podscribe_model::ModelRunner;
use podscribe_queue::Broker;
use podscribe_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RECLAIM_COUNT: usize = 100;
const RECLAIM_PERIOD: Duration = Duration::from_secs(5 * 60);

pub struct RecoveryLoop {
    broker: Arc<dyn Broker>,
    store: Arc<dyn ObjectStore>,
    cache: Arc<LocalCache>,
    model: Arc<dyn ModelRunner>,
    config: Config,
    consumer_id: String,
}

impl RecoveryLoop {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<LocalCache>,
        model: Arc<dyn ModelRunner>,
        config: Config,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            store,
            cache,
            model,
            config,
            consumer_id: consumer_id.into(),
        }
    }

    /// Runs until `shutdown` is cancelled. A no-op if `RECLAIM_ENABLED` is
    /// false, per the Open Question resolution: some deployments rely on
    /// natural redelivery alone and disable the periodic sweep.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.reclaim_enabled {
            tracing::info!("reclaim loop disabled by configuration");
            return;
        }

        let min_idle = Duration::from_millis(self.config.reclaim_idle_ms);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECLAIM_PERIOD) => {}
            }
            if shutdown.is_cancelled() {
                break;
            }
            self.sweep_once(min_idle).await;
        }
    }

    /// One reclaim pass: exposed separately from [`RecoveryLoop::run`] so
    /// tests can drive it deterministically without waiting on the timer.
    pub async fn sweep_once(&self, min_idle: Duration) {
        let reclaimed = match self
            .broker
            .reclaim(
                &self.config.stream_name,
                &self.config.consumer_group,
                &self.consumer_id,
                min_idle,
                RECLAIM_COUNT,
            )
            .await
        {
            Ok(reclaimed) => reclaimed,
            Err(e) => {
                tracing::error!(error = %e, "reclaim call failed");
                return;
            }
        };

        if reclaimed.is_empty() {
            return;
        }
        tracing::info!(count = reclaimed.len(), "reclaimed idle messages");

        for delivery in reclaimed {
            let deliveries = self
                .broker
                .delivery_count(&self.config.stream_name, &self.config.consumer_group, &delivery.queue_id)
                .await
                .unwrap_or(None);

            if deliveries.map(|count| count > self.config.max_deliveries).unwrap_or(false) {
                self.quarantine_exhausted(&delivery).await;
                continue;
            }

            let outcome = podscribe_scheduler::process_message(
                self.broker.as_ref(),
                self.store.as_ref(),
                &self.cache,
                self.model.as_ref(),
                &self.config.stream_name,
                &self.config.consumer_group,
                Duration::from_secs(self.config.lock_ttl_sec),
                &delivery,
            )
            .await;
            tracing::info!(key = %delivery.message.key, outcome = ?outcome, "reclaimed job finished");
        }
    }

    async fn quarantine_exhausted(&self, delivery: &podscribe_core::Delivery) -> DeadLetterRecord {
        tracing::warn!(
            key = %delivery.message.key,
            queue_id = %delivery.queue_id,
            max_deliveries = self.config.max_deliveries,
            "delivery count exceeded max-deliveries bound, quarantining as poison"
        );
        if let Err(e) = self
            .broker
            .ack(&self.config.stream_name, &self.config.consumer_group, &delivery.queue_id)
            .await
        {
            tracing::error!(queue_id = %delivery.queue_id, error = %e, "failed to ack exhausted-delivery message");
        }
        DeadLetterRecord {
            queue_id: delivery.queue_id.clone(),
            raw_payload: delivery.message.key.clone(),
            reason: format!("exceeded max delivery count ({})", self.config.max_deliveries),
            occurred_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podscribe_model::FakeModelRunner;
    use podscribe_queue::InMemoryBroker;
    use podscribe_store::InMemoryObjectStore;

    fn test_config() -> Config {
        Config {
            gpu_batch_size: 4,
            download_workers: 2,
            prefetch_multiplier: 2,
            cache_dir: std::path::PathBuf::from("/tmp"),
            reclaim_idle_ms: 0,
            reclaim_enabled: true,
            lock_ttl_sec: 21_600,
            dedup_ttl_sec: 86_400,
            compute_type: "float16".into(),
            language: "sv".into(),
            max_deliveries: 5,
            model_path: std::path::PathBuf::from("/models/ggml-large-v3.bin"),
            s3_bucket: "bucket".into(),
            s3_region: None,
            s3_endpoint_url: None,
            s3_prefix: None,
            redis_url: "redis://localhost".into(),
            stream_name: "s".into(),
            consumer_group: "g".into(),
        }
    }

    #[tokio::test]
    async fn reclaimed_message_is_run_through_the_standard_lifecycle() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryObjectStore::new());
        store.seed("p/e/e.mp3", b"audio".to_vec());
        broker.ensure_group("s", "g").await.unwrap();
        broker.append("s", "p/e/e.mp3").await.unwrap();
        // A first read-and-abandon simulates a consumer dying after
        // delivery but before ack.
        broker.read_group("s", "g", "dead-consumer", 10, Duration::from_millis(0)).await.unwrap();

        let dir = tempfile::tempdir().unwrap().into_path();
        let cache = Arc::new(LocalCache::new(dir).await.unwrap());
        let model = Arc::new(FakeModelRunner::new());
        let recovery = RecoveryLoop::new(broker.clone(), store.clone(), cache, model, test_config(), "worker-2");

        recovery.sweep_once(Duration::from_millis(0)).await;

        assert!(store.contents("p/e/e.txt").is_some());
    }

    #[tokio::test]
    async fn exhausted_delivery_count_is_quarantined_not_reclaimed_again() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryObjectStore::new());
        // No audio seeded: if this were re-run through the lifecycle it
        // would fail the download step instead of being quarantined.
        broker.ensure_group("s", "g").await.unwrap();
        let id = broker.append("s", "p/e/e.mp3").await.unwrap();
        broker.read_group("s", "g", "c1", 10, Duration::from_millis(0)).await.unwrap();
        for _ in 0..6 {
            broker.reclaim("s", "g", "c1", Duration::from_millis(0), 10).await.unwrap();
        }

        let mut config = test_config();
        config.max_deliveries = 5;
        let dir = tempfile::tempdir().unwrap().into_path();
        let cache = Arc::new(LocalCache::new(dir).await.unwrap());
        let model = Arc::new(FakeModelRunner::new());
        let recovery = RecoveryLoop::new(broker.clone(), store.clone(), cache, model, config, "worker-2");

        recovery.sweep_once(Duration::from_millis(0)).await;

        // Quarantine acked the message; nothing left pending to reclaim.
        let reclaimed = broker.reclaim("s", "g", "c3", Duration::from_millis(0), 10).await.unwrap();
        assert!(reclaimed.is_empty());
        let _ = id;
    }
}
