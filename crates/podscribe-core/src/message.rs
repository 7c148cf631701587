use crate::keys::AudioKey;
use serde::{Deserialize, Serialize};

/// A job as it travels through the queue: carries only the audio key.
/// Equality is on `key` — duplicate messages for the same key are expected
/// and must be tolerated by every consumer of this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub key: AudioKey,
}

impl PartialEq for JobMessage {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for JobMessage {}

/// A message as delivered by the broker: its server-assigned id plus the
/// parsed payload. Adapters normalize raw broker field maps into this type
/// at the boundary — scheduler code never sees raw bytes.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue_id: String,
    pub message: JobMessage,
}

/// Raised when a raw broker payload cannot be parsed into a [`JobMessage`].
/// Poison messages are acked and dropped, never retried; the raw payload is
/// preserved for the dead-letter record.
#[derive(Debug, Clone)]
pub struct PoisonPayload {
    pub queue_id: String,
    pub raw_payload: String,
    pub reason: String,
}

/// Parse a raw `key -> value` field map as delivered by the broker into a
/// typed [`Delivery`], or a [`PoisonPayload`] if the `key` field is missing
/// or the payload is otherwise malformed.
pub fn parse_delivery(
    queue_id: impl Into<String>,
    fields: &std::collections::HashMap<String, String>,
) -> Result<Delivery, PoisonPayload> {
    let queue_id = queue_id.into();
    match fields.get("key") {
        Some(key) if !key.is_empty() => Ok(Delivery {
            queue_id,
            message: JobMessage { key: key.clone() },
        }),
        _ => Err(PoisonPayload {
            queue_id,
            raw_payload: serde_json::to_string(fields).unwrap_or_default(),
            reason: "message missing 'key' field".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn duplicate_keys_compare_equal() {
        let a = JobMessage { key: "p/e/e.mp3".into() };
        let b = JobMessage { key: "p/e/e.mp3".into() };
        assert_eq!(a, b);
    }

    #[test]
    fn parses_valid_payload() {
        let mut fields = HashMap::new();
        fields.insert("key".to_string(), "p/e/e.mp3".to_string());
        let delivery = parse_delivery("1-0", &fields).unwrap();
        assert_eq!(delivery.message.key, "p/e/e.mp3");
        assert_eq!(delivery.queue_id, "1-0");
    }

    #[test]
    fn missing_key_field_is_poison() {
        let mut fields = HashMap::new();
        fields.insert("foo".to_string(), "bar".to_string());
        let err = parse_delivery("1-0", &fields).unwrap_err();
        assert_eq!(err.queue_id, "1-0");
        assert!(err.reason.contains("key"));
    }
}
