use crate::decode::decode_to_pcm_16k_mono;
use crate::{ModelParams, ModelRunner};
use async_trait::async_trait;
use podscribe_core::{ModelError, Segment, TranscriptionResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Loads `KBLab/kb-whisper-large`-equivalent weights once per process.
/// Inference access is serialized behind a `tokio::sync::Mutex` since
/// `whisper-rs`'s state is not safe for concurrent transcription — one
/// batch call occupies the accelerator at a time, per the spec's
/// shared-resource policy.
pub struct WhisperModelRunner {
    state: Arc<Mutex<whisper_rs::WhisperState>>,
    params: ModelParams,
}

impl WhisperModelRunner {
    pub fn load(model_path: &Path, params: ModelParams) -> Result<Self, ModelError> {
        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu(true);
        let ctx = WhisperContext::new_with_params(
            model_path.to_str().ok_or_else(|| ModelError::LoadFailed("non-utf8 model path".to_string()))?,
            ctx_params,
        )
        .map_err(|e| ModelError::LoadFailed(e.to_string()))?;
        let state = ctx
            .create_state()
            .map_err(|e| ModelError::LoadFailed(e.to_string()))?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            params,
        })
    }

    fn full_params(&self) -> FullParams<'static, 'static> {
        // beam_size 0 / greedy, temperature 0.0, no cross-segment
        // conditioning — fixed per spec.md §4.4. VAD filtering (also
        // fixed) happens upstream, in decode_to_pcm_16k_mono.
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.params.language));
        params.set_translate(false);
        params.set_temperature(0.0);
        params.set_no_context(true);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params
    }
}

#[async_trait]
impl ModelRunner for WhisperModelRunner {
    async fn transcribe_one(&self, path: &Path) -> Result<TranscriptionResult, ModelError> {
        let samples = decode_to_pcm_16k_mono(path)?;
        let state = Arc::clone(&self.state);
        let params = self.full_params();
        let path_for_err = path.display().to_string();
        let language = self.params.language.clone();

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            state.full(params, &samples).map_err(|e| ModelError::TranscriptionFailed {
                path: path_for_err.clone(),
                detail: e.to_string(),
            })?;

            let num_segments = state
                .full_n_segments()
                .map_err(|e| ModelError::TranscriptionFailed {
                    path: path_for_err.clone(),
                    detail: e.to_string(),
                })?;
            let mut segments = Vec::with_capacity(num_segments as usize);
            for i in 0..num_segments {
                let text = state.full_get_segment_text(i).map_err(|e| ModelError::TranscriptionFailed {
                    path: path_for_err.clone(),
                    detail: e.to_string(),
                })?;
                let start = state.full_get_segment_t0(i).unwrap_or(0) as f64 / 100.0;
                let end = state.full_get_segment_t1(i).unwrap_or(0) as f64 / 100.0;
                segments.push(Segment { start, end, text });
            }
            Ok(TranscriptionResult {
                segments,
                language: Some(language.clone()),
                language_probability: None,
            })
        })
        .await
        .map_err(|e| ModelError::TranscriptionFailed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?
    }

    async fn transcribe_batch(&self, paths: &[PathBuf]) -> Vec<Result<TranscriptionResult, ModelError>> {
        // One model, one accelerator: process sequentially under the
        // shared mutex rather than fan out tasks that would just queue on
        // the same lock.
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let timeout = tokio::time::Duration::from_secs(600);
            let result = tokio::time::timeout(timeout, self.transcribe_one(path))
                .await
                .unwrap_or(Err(ModelError::BatchTimeout(timeout)));
            results.push(result);
        }
        results
    }
}
