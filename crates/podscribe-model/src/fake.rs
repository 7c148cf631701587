use crate::ModelRunner;
use async_trait::async_trait;
use podscribe_core::{ModelError, Segment, TranscriptionResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Deterministic test double: "transcribes" a file to a fixed string
/// derived from its path, so tests can assert on output without GPU
/// hardware. Paths listed via [`FakeModelRunner::fail_path`] report a
/// failure instead, for exercising the partial-batch-success path.
#[derive(Default)]
pub struct FakeModelRunner {
    failing: Mutex<HashSet<PathBuf>>,
    batch_call_sizes: Mutex<Vec<usize>>,
}

impl FakeModelRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_path(&self, path: impl Into<PathBuf>) {
        self.failing.lock().expect("fake model mutex poisoned").insert(path.into());
    }

    /// Size of every `transcribe_batch` call made so far, in call order —
    /// lets tests assert on how the scheduler sliced its batches.
    pub fn batch_call_sizes(&self) -> Vec<usize> {
        self.batch_call_sizes.lock().expect("fake model mutex poisoned").clone()
    }
}

#[async_trait]
impl ModelRunner for FakeModelRunner {
    async fn transcribe_one(&self, path: &Path) -> Result<TranscriptionResult, ModelError> {
        if self.failing.lock().expect("fake model mutex poisoned").contains(path) {
            return Err(ModelError::TranscriptionFailed {
                path: path.display().to_string(),
                detail: "injected failure".to_string(),
            });
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown");
        Ok(TranscriptionResult {
            segments: vec![Segment {
                start: 0.0,
                end: 1.0,
                text: format!("transcript for {stem}"),
            }],
            language: Some("sv".to_string()),
            language_probability: Some(1.0),
        })
    }

    async fn transcribe_batch(&self, paths: &[PathBuf]) -> Vec<Result<TranscriptionResult, ModelError>> {
        self.batch_call_sizes
            .lock()
            .expect("fake model mutex poisoned")
            .push(paths.len());
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            results.push(self.transcribe_one(path).await);
        }
        results
    }
}
