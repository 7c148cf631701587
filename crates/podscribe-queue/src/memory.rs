use crate::{Broker, Reclaimed};
use async_trait::async_trait;
use podscribe_core::{BrokerError, Delivery, PoisonPayload};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct PendingEntry {
    fields: HashMap<String, String>,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

struct StreamState {
    next_id: u64,
    backlog: Vec<(String, HashMap<String, String>)>,
    pending: HashMap<String, PendingEntry>,
}

#[derive(Default)]
struct LockEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// Deterministic in-memory broker for tests: groups, pending tracking, and
/// idle-based reclaim are modeled directly instead of delegated to Redis,
/// so property tests (mutual exclusion, reclaim timing) can assert on
/// exact behavior without a live server.
#[derive(Default)]
pub struct InMemoryBroker {
    streams: Mutex<HashMap<(String, String), StreamState>>,
    kv: Mutex<HashMap<String, LockEntry>>,
    counters: Mutex<HashMap<String, i64>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream_key(stream: &str, group: &str) -> (String, String) {
        (stream.to_string(), group.to_string())
    }

    /// Test-only escape hatch: append a raw field map instead of a well-formed
    /// `key` payload, so tests can exercise the poison-message path without a
    /// live Redis server to produce a malformed delivery.
    pub fn append_raw_for_test(&self, stream: &str, fields: HashMap<String, String>) -> String {
        let mut streams = self.streams.lock().expect("broker mutex poisoned");
        let mut assigned_id = None;
        for ((s, _g), state) in streams.iter_mut().filter(|((s, _), _)| s == stream) {
            let _ = s;
            let id = format!("{}-0", state.next_id);
            state.next_id += 1;
            state.backlog.push((id.clone(), fields.clone()));
            assigned_id = Some(id);
        }
        assigned_id.expect("no consumer group registered for stream")
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut streams = self.streams.lock().expect("broker mutex poisoned");
        streams
            .entry(Self::stream_key(stream, group))
            .or_insert_with(|| StreamState {
                next_id: 1,
                backlog: Vec::new(),
                pending: HashMap::new(),
            });
        Ok(())
    }

    async fn append(&self, stream: &str, key: &str) -> Result<String, BrokerError> {
        let mut streams = self.streams.lock().expect("broker mutex poisoned");
        // A stream can have multiple groups in real Redis; for this test
        // double we key state per (stream, group) but appends must reach
        // every group already registered for the stream.
        let mut assigned_id = None;
        let mut fields = HashMap::new();
        fields.insert("key".to_string(), key.to_string());
        for ((s, _g), state) in streams.iter_mut().filter(|((s, _), _)| s == stream) {
            let _ = s;
            let id = format!("{}-0", state.next_id);
            state.next_id += 1;
            state.backlog.push((id.clone(), fields.clone()));
            assigned_id = Some(id);
        }
        match assigned_id {
            Some(id) => Ok(id),
            None => Err(BrokerError::Failed {
                operation: "append".to_string(),
                detail: format!("no consumer group registered for stream {stream}"),
            }),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        _block: Duration,
    ) -> Result<Vec<Result<Delivery, PoisonPayload>>, BrokerError> {
        let mut streams = self.streams.lock().expect("broker mutex poisoned");
        let state = streams
            .get_mut(&Self::stream_key(stream, group))
            .ok_or_else(|| BrokerError::Failed {
                operation: "read_group".to_string(),
                detail: "unknown group".to_string(),
            })?;

        let take = count.min(state.backlog.len());
        let drained: Vec<_> = state.backlog.drain(..take).collect();
        let mut out = Vec::with_capacity(drained.len());
        for (queue_id, fields) in drained {
            state.pending.insert(
                queue_id.clone(),
                PendingEntry {
                    fields: fields.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                    delivery_count: 1,
                },
            );
            out.push(podscribe_core::parse_delivery(queue_id, &fields));
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, queue_id: &str) -> Result<(), BrokerError> {
        let mut streams = self.streams.lock().expect("broker mutex poisoned");
        if let Some(state) = streams.get_mut(&Self::stream_key(stream, group)) {
            state.pending.remove(queue_id);
        }
        Ok(())
    }

    async fn reclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<Reclaimed>, BrokerError> {
        let mut streams = self.streams.lock().expect("broker mutex poisoned");
        let state = streams
            .get_mut(&Self::stream_key(stream, group))
            .ok_or_else(|| BrokerError::Failed {
                operation: "reclaim".to_string(),
                detail: "unknown group".to_string(),
            })?;

        let now = Instant::now();
        let mut claimed = Vec::new();
        for (queue_id, entry) in state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(entry.delivered_at) >= min_idle {
                entry.consumer = consumer.to_string();
                entry.delivered_at = now;
                entry.delivery_count += 1;
                // A poison entry reclaimed here is dropped rather than
                // resurfaced: it was never going to parse differently,
                // mirroring the adapter-boundary drop in the Redis path.
                if let Ok(delivery) = podscribe_core::parse_delivery(queue_id.clone(), &entry.fields) {
                    claimed.push(delivery);
                }
            }
        }
        Ok(claimed)
    }

    async fn delivery_count(&self, stream: &str, group: &str, queue_id: &str) -> Result<Option<u32>, BrokerError> {
        let streams = self.streams.lock().expect("broker mutex poisoned");
        Ok(streams
            .get(&Self::stream_key(stream, group))
            .and_then(|state| state.pending.get(queue_id))
            .map(|entry| entry.delivery_count))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BrokerError> {
        let mut kv = self.kv.lock().expect("broker mutex poisoned");
        let now = Instant::now();
        if let Some(existing) = kv.get(key) {
            if existing.expires_at.map(|exp| exp > now).unwrap_or(true) {
                return Ok(false);
            }
        }
        kv.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        self.kv.lock().expect("broker mutex poisoned").remove(key);
        Ok(())
    }

    async fn incr(&self, counter: &str) -> Result<i64, BrokerError> {
        let mut counters = self.counters.lock().expect("broker mutex poisoned");
        let value = counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn counter(&self, counter: &str) -> Result<i64, BrokerError> {
        Ok(*self.counters.lock().expect("broker mutex poisoned").get(counter).unwrap_or(&0))
    }
}
