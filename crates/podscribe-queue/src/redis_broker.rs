use crate::{Broker, Reclaimed};
use async_trait::async_trait;
use podscribe_core::{BrokerError, Delivery, PoisonPayload};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use std::collections::HashMap;
use std::time::Duration;

/// Redis Streams-backed broker: `XADD`/`XGROUP`/`XREADGROUP`/`XACK`/
/// `XAUTOCLAIM`/`XPENDING` for the stream, plain `SET NX EX`/`DEL`/`INCR`
/// for locks, dedup entries, and counters — mirroring the Python source's
/// `redis-py` usage in `original_source/step-7-transcribe-mp3-speed-up-step-7.py`.
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url).map_err(|e| fail("connect", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| fail("connect", e))?;
        Ok(Self { conn })
    }
}

fn fail(operation: &str, err: impl std::fmt::Display) -> BrokerError {
    BrokerError::Failed {
        operation: operation.to_string(),
        detail: err.to_string(),
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(fail("ensure_group", e)),
        }
    }

    async fn append(&self, stream: &str, key: &str) -> Result<String, BrokerError> {
        let mut conn = self.conn.clone();
        redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg("key")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| fail("append", e))
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Result<Delivery, PoisonPayload>>, BrokerError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as usize)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| fail("read_group", e))?;

        Ok(deliveries_from_reply(reply))
    }

    async fn ack(&self, stream: &str, group: &str, queue_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[queue_id]).await.map_err(|e| fail("ack", e))?;
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
        let mut conn = self.conn.clone();
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as usize)
            .arg("0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| fail("reclaim", e))?;

        parse_xautoclaim_reply(reply)
    }

    async fn delivery_count(&self, stream: &str, group: &str, queue_id: &str) -> Result<Option<u32>, BrokerError> {
        let mut conn = self.conn.clone();
        let reply: redis::Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(0)
            .arg(queue_id)
            .arg(queue_id)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| fail("delivery_count", e))?;
        Ok(parse_xpending_delivery_count(reply))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| fail("set_if_absent", e))?;
        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(|e| fail("delete", e))?;
        Ok(())
    }

    async fn incr(&self, counter: &str) -> Result<i64, BrokerError> {
        let mut conn = self.conn.clone();
        conn.incr(counter, 1).await.map_err(|e| fail("incr", e))
    }

    async fn counter(&self, counter: &str) -> Result<i64, BrokerError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(counter).await.map_err(|e| fail("counter", e))?;
        Ok(value.unwrap_or(0))
    }
}

fn deliveries_from_reply(reply: redis::streams::StreamReadReply) -> Vec<Result<Delivery, PoisonPayload>> {
    let mut out = Vec::new();
    for key in reply.keys {
        for stream_id in key.ids {
            let mut fields = HashMap::new();
            for (field, value) in stream_id.map {
                if let redis::Value::BulkString(bytes) = value {
                    if let Ok(s) = String::from_utf8(bytes) {
                        fields.insert(field, s);
                    }
                }
            }
            out.push(podscribe_core::parse_delivery(stream_id.id.clone(), &fields));
        }
    }
    out
}

fn parse_xautoclaim_reply(reply: redis::Value) -> Result<Vec<Reclaimed>, BrokerError> {
    let redis::Value::Array(top) = reply else {
        return Err(fail("reclaim", "unexpected XAUTOCLAIM reply shape"));
    };
    // [cursor, entries, deleted_ids]; entries is [[id, [field, value, ...]], ...]
    let Some(redis::Value::Array(entries)) = top.get(1) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for entry in entries {
        let redis::Value::Array(pair) = entry else { continue };
        let (Some(redis::Value::BulkString(id_bytes)), Some(redis::Value::Array(kv))) =
            (pair.first(), pair.get(1))
        else {
            continue;
        };
        let Ok(id) = String::from_utf8(id_bytes.clone()) else { continue };
        let mut fields = HashMap::new();
        let mut iter = kv.iter();
        while let (Some(redis::Value::BulkString(k)), Some(redis::Value::BulkString(v))) =
            (iter.next(), iter.next())
        {
            if let (Ok(k), Ok(v)) = (String::from_utf8(k.clone()), String::from_utf8(v.clone())) {
                fields.insert(k, v);
            }
        }
        match podscribe_core::parse_delivery(id.clone(), &fields) {
            Ok(delivery) => out.push(delivery),
            Err(poison) => {
                tracing::warn!(queue_id = %poison.queue_id, reason = %poison.reason, "dropping unparseable reclaim");
            }
        }
    }
    Ok(out)
}

fn parse_xpending_delivery_count(reply: redis::Value) -> Option<u32> {
    let redis::Value::Array(rows) = reply else { return None };
    let row = rows.first()?;
    let redis::Value::Array(fields) = row else { return None };
    // [id, consumer, idle_ms, delivery_count]
    match fields.get(3)? {
        redis::Value::Int(n) => Some(*n as u32),
        redis::Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        _ => None,
    }
}
