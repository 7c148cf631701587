//! Queue Adapter (component B): stream append, consumer-group read,
//! acknowledge, pending reclaim, set-if-absent locks/dedup, counters.

mod memory;
mod redis_broker;

pub use memory::InMemoryBroker;
pub use redis_broker::RedisBroker;

use async_trait::async_trait;
use podscribe_core::{BrokerError, Delivery, PoisonPayload};
use std::time::Duration;

/// A message reclaimed from another, presumably dead, consumer.
pub type Reclaimed = Delivery;

/// Broker capabilities required by the scheduler, producer, and recovery
/// loop. One real implementation (Redis Streams) and one in-memory
/// implementation (deterministic tests of mutual exclusion and reclaim
/// timing) are provided.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the consumer group if absent. "Group already exists" is
    /// mapped to success at this boundary.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError>;

    /// Append a job message, returning the server-assigned id.
    async fn append(&self, stream: &str, key: &str) -> Result<String, BrokerError>;

    /// Read up to `count` messages not yet delivered to this group,
    /// blocking up to `block` for at least one to arrive. Each entry is
    /// parsed at this boundary: a payload missing the `key` field comes
    /// back as `Err(PoisonPayload)` rather than being silently dropped, so
    /// the caller can ack-and-dead-letter it instead of leaving it pending
    /// forever.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Result<Delivery, PoisonPayload>>, BrokerError>;

    async fn ack(&self, stream: &str, group: &str, queue_id: &str) -> Result<(), BrokerError>;

    /// Reassign up to `count` messages idle for at least `min_idle` in
    /// `group` to `consumer`.
    async fn reclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<Reclaimed>, BrokerError>;

    /// How many times a still-pending message has been delivered, used to
    /// bound poison-quarantine decisions. `None` if the broker has no
    /// record of the message (already acked, or never delivered).
    async fn delivery_count(&self, stream: &str, group: &str, queue_id: &str) -> Result<Option<u32>, BrokerError>;

    /// `SET key value NX EX ttl`. `true` if the key was set (lock/dedup
    /// acquired), `false` if it already existed.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BrokerError>;

    async fn delete(&self, key: &str) -> Result<(), BrokerError>;

    async fn incr(&self, counter: &str) -> Result<i64, BrokerError>;

    async fn counter(&self, counter: &str) -> Result<i64, BrokerError>;
}
