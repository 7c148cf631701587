//! Model Runner (component D): loads weights once per process and exposes
//! single-file and batch transcription, preserving input order.

mod decode;
mod fake;
mod whisper;

pub use fake::FakeModelRunner;
pub use whisper::WhisperModelRunner;

use async_trait::async_trait;
use podscribe_core::{ModelError, TranscriptionResult};
use std::path::Path;

/// Engine parameters are fixed constants of the spec, not runtime knobs:
/// language hint, VAD filtering, greedy decoding, no cross-segment
/// conditioning. Implementers must not randomize these — outputs must stay
/// stable across workers.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub language: String,
    pub compute_type: String,
}

#[async_trait]
pub trait ModelRunner: Send + Sync {
    async fn transcribe_one(&self, path: &Path) -> Result<TranscriptionResult, ModelError>;

    /// Per-file failures are reported as a failure variant in the returned
    /// sequence, in the same order as `paths`; a partial batch yields
    /// partial success.
    async fn transcribe_batch(&self, paths: &[std::path::PathBuf]) -> Vec<Result<TranscriptionResult, ModelError>>;
}
