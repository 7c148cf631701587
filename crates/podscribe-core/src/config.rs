use crate::error::ConfigError;
use std::path::PathBuf;

/// Process-wide configuration, assembled once by the supervisor and passed
/// by value/reference into adapters and the scheduler — no process-global
/// mutable state, per the "global singletons become explicit dependency
/// objects" design note.
#[derive(Debug, Clone)]
pub struct Config {
    pub gpu_batch_size: usize,
    pub download_workers: usize,
    pub prefetch_multiplier: usize,
    pub cache_dir: PathBuf,
    pub reclaim_idle_ms: u64,
    pub reclaim_enabled: bool,
    pub lock_ttl_sec: u64,
    pub dedup_ttl_sec: u64,
    pub compute_type: String,
    pub language: String,
    pub max_deliveries: u32,
    pub model_path: PathBuf,

    pub s3_bucket: String,
    pub s3_region: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub s3_prefix: Option<String>,

    pub redis_url: String,
    pub stream_name: String,
    pub consumer_group: String,
}

/// The prefetch window size: `max(B, B * PREFETCH_MULTIPLIER)`.
impl Config {
    pub fn prefetch_window(&self) -> usize {
        std::cmp::max(self.gpu_batch_size, self.gpu_batch_size * self.prefetch_multiplier)
    }

    /// Load configuration from process environment variables, applying the
    /// documented defaults from the spec's environment table.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            gpu_batch_size: parse_env_or("GPU_BATCH_SIZE", 16)?,
            download_workers: parse_env_or("DOWNLOAD_WORKERS", 4)?,
            prefetch_multiplier: parse_env_or("PREFETCH_MULTIPLIER", 2)?,
            cache_dir: PathBuf::from(env_or("CACHE_DIR", "/cache")),
            reclaim_idle_ms: parse_env_or("RECLAIM_IDLE_MS", 7_200_000)?,
            reclaim_enabled: parse_env_or("RECLAIM_ENABLED", true)?,
            lock_ttl_sec: parse_env_or("LOCK_TTL_SEC", 21_600)?,
            dedup_ttl_sec: parse_env_or("DEDUP_TTL_SEC", 86_400)?,
            compute_type: env_or("COMPUTE_TYPE", "float16"),
            language: env_or("LANGUAGE", "sv"),
            max_deliveries: parse_env_or("MAX_DELIVERIES", 5)?,
            model_path: PathBuf::from(env_or("MODEL_PATH", "/models/ggml-large-v3.bin")),

            s3_bucket: required_env("S3_BUCKET")?,
            s3_region: std::env::var("S3_REGION").ok(),
            s3_endpoint_url: std::env::var("S3_ENDPOINT_URL").ok(),
            s3_prefix: std::env::var("S3_PREFIX").ok(),

            redis_url: required_env("REDIS_URL")?,
            stream_name: env_or("REDIS_STREAM", "podcast:queue"),
            consumer_group: env_or("REDIS_GROUP", "workers"),
        })
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name.to_string()))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            name: name.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
    }
}
