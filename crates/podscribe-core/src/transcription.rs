use serde::{Deserialize, Serialize};

/// One decoded span of speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Output of a single-file or one-slot-of-a-batch transcription call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptionResult {
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    pub language_probability: Option<f32>,
}

impl TranscriptionResult {
    /// Final transcript text: stripped segment texts joined by `\n`.
    pub fn to_plain_text(&self) -> String {
        self.segments
            .iter()
            .map(|seg| seg.text.trim())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A dead-letter entry recorded for a poison message or a wholesale batch
/// failure, kept in an in-memory ring buffer for inspection/metrics and
/// logged structurally via `tracing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub queue_id: String,
    pub raw_payload: String,
    pub reason: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_stripped_segments_with_newline() {
        let result = TranscriptionResult {
            segments: vec![
                Segment { start: 0.0, end: 1.0, text: "  hej ".into() },
                Segment { start: 1.0, end: 2.0, text: "daga  ".into() },
            ],
            language: Some("sv".into()),
            language_probability: Some(0.99),
        };
        assert_eq!(result.to_plain_text(), "hej\ndaga");
    }

    #[test]
    fn empty_segments_yield_empty_text() {
        let result = TranscriptionResult::default();
        assert_eq!(result.to_plain_text(), "");
    }
}
