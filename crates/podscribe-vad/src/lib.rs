//! Voice-activity filtering: component D's speech-to-text engine runs with
//! VAD filtering enabled as a fixed, non-optional parameter (spec.md §4.4),
//! so decoded audio is passed through Silero here before it ever reaches
//! the model. Grounded on the teacher's `gibberish-vad` wrapper around the
//! `silero` crate.

use silero::{VadConfig, VadSession, VadTransition};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VadError {
    #[error("vad session creation failed")]
    SessionCreationFailed,
    #[error("vad inference error: {0}")]
    InferenceError(String),
}

/// Runs one full utterance through Silero VAD and returns only the
/// samples that fall inside detected speech segments, concatenated in
/// speech order. A clip with no detected speech (e.g. a short jingle)
/// returns the original samples unfiltered rather than an empty input.
pub fn filter_speech(samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, VadError> {
    let config = VadConfig {
        sample_rate: sample_rate as usize,
        redemption_time: Duration::from_millis(500),
        pre_speech_pad: Duration::from_millis(200),
        post_speech_pad: Duration::from_millis(200),
        min_speech_time: Duration::from_millis(100),
        ..Default::default()
    };
    let mut session = VadSession::new(config).map_err(|_| VadError::SessionCreationFailed)?;
    let transitions = session
        .process(samples)
        .map_err(|e| VadError::InferenceError(e.to_string()))?;

    let mut speech = Vec::new();
    for transition in transitions {
        if let VadTransition::SpeechEnd { samples, .. } = transition {
            speech.extend(samples);
        }
    }
    Ok(if speech.is_empty() { samples.to_vec() } else { speech })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_only_falls_back_to_the_original_samples() {
        let silence = vec![0.0f32; 16_000];
        let filtered = filter_speech(&silence, 16_000).unwrap();
        assert_eq!(filtered.len(), silence.len());
    }
}
