mod config;
mod entry;
mod error;
mod keys;
mod message;
mod transcription;

pub use config::Config;
pub use entry::{EntryState, PrefetchEntry};
pub use error::{BrokerError, ConfigError, CoreError, ModelError, StoreError};
pub use keys::{is_audio_key, transcript_key_for, AudioKey, TranscriptKey, AUDIO_EXTENSIONS};
pub use message::{parse_delivery, Delivery, JobMessage, PoisonPayload};
pub use transcription::{DeadLetterRecord, Segment, TranscriptionResult};
