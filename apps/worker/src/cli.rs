use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "podscribe", about = "Distributed podcast transcription worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the consumer loop (scheduler + recovery) until signaled.
    Worker,
    /// Run the producer once and exit.
    EnqueueMissing {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Operational extra: pre-stage audio from the object store onto local
    /// disk, or list what's already staged, without touching the queue.
    Stage {
        #[arg(long)]
        staging_dir: PathBuf,
        #[arg(long)]
        prefix: Option<String>,
    },
}
