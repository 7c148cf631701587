//! Process Supervisor (component I): wires the object store, broker, local
//! cache, and model runner into the scheduler and recovery loops; owns
//! startup, the consumer-group lifecycle, and graceful shutdown.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use podscribe_cache::LocalCache;
use podscribe_core::Config;
use podscribe_model::{ModelParams, ModelRunner, WhisperModelRunner};
use podscribe_queue::{Broker, RedisBroker};
use podscribe_recovery::RecoveryLoop;
use podscribe_scheduler::Scheduler;
use podscribe_store::{ObjectStore, S3ObjectStore};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Hard deadline for a drain after shutdown is requested: 60s after the
/// inference task finishes its current batch.
const DRAIN_DEADLINE: Duration = Duration::from_secs(60);

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,podscribe=debug")))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error, aborting startup");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Command::Worker => run_worker(config).await,
        Command::EnqueueMissing { prefix } => run_enqueue_missing(config, prefix).await,
        Command::Stage { staging_dir, prefix } => run_stage(config, staging_dir, prefix).await,
    }
}

async fn build_store(config: &Config) -> Arc<dyn ObjectStore> {
    Arc::new(S3ObjectStore::new(config.s3_bucket.clone(), config.s3_region.clone(), config.s3_endpoint_url.clone()).await)
}

async fn build_broker(config: &Config) -> anyhow::Result<Arc<dyn Broker>> {
    let broker = RedisBroker::connect(&config.redis_url).await?;
    Ok(Arc::new(broker))
}

async fn run_worker(config: Config) -> ExitCode {
    let store = build_store(&config).await;
    let broker = match build_broker(&config).await {
        Ok(broker) => broker,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to broker, aborting startup");
            return ExitCode::from(1);
        }
    };
    if let Err(e) = broker.ensure_group(&config.stream_name, &config.consumer_group).await {
        tracing::error!(error = %e, "failed to create consumer group, aborting startup");
        return ExitCode::from(1);
    }

    let cache = match LocalCache::new(config.cache_dir.clone()).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            tracing::error!(error = %e, "failed to prepare local cache, aborting startup");
            return ExitCode::from(1);
        }
    };

    let model_params = ModelParams {
        language: config.language.clone(),
        compute_type: config.compute_type.clone(),
    };
    let model: Arc<dyn ModelRunner> = match WhisperModelRunner::load(&config.model_path, model_params) {
        Ok(runner) => Arc::new(runner),
        Err(e) => {
            tracing::error!(error = %e, "failed to load model weights, aborting startup");
            return ExitCode::from(1);
        }
    };

    let consumer_id = format!(
        "{}-{}",
        hostname_or_default(),
        std::process::id()
    );

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        broker.clone(),
        store.clone(),
        cache.clone(),
        model.clone(),
        config.clone(),
        consumer_id.clone(),
    );
    let recovery = RecoveryLoop::new(broker.clone(), store.clone(), cache.clone(), model.clone(), config.clone(), consumer_id);

    let scheduler_shutdown = shutdown.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });
    let recovery_shutdown = shutdown.clone();
    let recovery_task = tokio::spawn(async move { recovery.run(recovery_shutdown).await });

    tracing::info!(stream = %config.stream_name, group = %config.consumer_group, "worker started");

    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install signal handler; running without graceful shutdown support");
    } else {
        tracing::info!("shutdown signal received, draining in-flight work");
    }
    shutdown.cancel();

    let drained = tokio::time::timeout(DRAIN_DEADLINE, async {
        let _ = scheduler_task.await;
        let _ = recovery_task.await;
    })
    .await;

    let processed = broker.counter("podcast:processed_count").await.unwrap_or(0);
    tracing::info!(processed, "worker exiting");

    match drained {
        Ok(()) => ExitCode::from(0),
        Err(_) => {
            tracing::error!("drain deadline exceeded, exiting without full drain");
            ExitCode::from(2)
        }
    }
}

async fn run_enqueue_missing(config: Config, prefix: Option<String>) -> ExitCode {
    let store = build_store(&config).await;
    let broker = match build_broker(&config).await {
        Ok(broker) => broker,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to broker, aborting startup");
            return ExitCode::from(1);
        }
    };
    if let Err(e) = broker.ensure_group(&config.stream_name, &config.consumer_group).await {
        tracing::error!(error = %e, "failed to create consumer group, aborting startup");
        return ExitCode::from(1);
    }

    let dedup_ttl = Duration::from_secs(config.dedup_ttl_sec);
    match podscribe_producer::run_producer(store.as_ref(), broker.as_ref(), &config.stream_name, prefix.as_deref(), dedup_ttl).await {
        Ok(report) => {
            tracing::info!(scanned = report.scanned, enqueued = report.enqueued, "producer pass complete");
            ExitCode::from(0)
        }
        Err(e) => {
            tracing::error!(error = %e, "producer pass failed");
            ExitCode::from(1)
        }
    }
}

async fn run_stage(config: Config, staging_dir: std::path::PathBuf, prefix: Option<String>) -> ExitCode {
    let store = build_store(&config).await;
    match podscribe_producer::stage_local(store.as_ref(), prefix.as_deref(), &staging_dir).await {
        Ok(report) => {
            tracing::info!(scanned = report.scanned, downloaded = report.downloaded, "staging pass complete");
            ExitCode::from(0)
        }
        Err(e) => {
            tracing::error!(error = %e, "staging pass failed");
            ExitCode::from(1)
        }
    }
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}
