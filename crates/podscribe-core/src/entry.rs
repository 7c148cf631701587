use crate::keys::{AudioKey, TranscriptKey};
use std::path::PathBuf;

/// State machine for a single prefetch entry, owned by one worker. Illegal
/// transitions (e.g. `Ready` back to `Locked`) are simply not exposed as
/// methods, so they cannot be expressed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Locked,
    Downloading,
    Ready,
    Transcribing,
    Uploading,
    Done,
    Failed,
}

/// An in-flight job a worker has claimed the lock for and is actively
/// downloading, has ready for inference, or has finished.
#[derive(Debug, Clone)]
pub struct PrefetchEntry {
    pub queue_id: String,
    pub key: AudioKey,
    pub transcript_key: TranscriptKey,
    pub lock_token: String,
    pub local_audio_path: PathBuf,
    pub local_output_path: PathBuf,
    pub state: EntryState,
    pub failure_reason: Option<String>,
}

impl PrefetchEntry {
    pub fn new(
        queue_id: impl Into<String>,
        key: AudioKey,
        transcript_key: TranscriptKey,
        lock_token: impl Into<String>,
        local_audio_path: PathBuf,
        local_output_path: PathBuf,
    ) -> Self {
        Self {
            queue_id: queue_id.into(),
            key,
            transcript_key,
            lock_token: lock_token.into(),
            local_audio_path,
            local_output_path,
            state: EntryState::Locked,
            failure_reason: None,
        }
    }

    pub fn mark_downloading(&mut self) {
        self.state = EntryState::Downloading;
    }

    pub fn mark_ready(&mut self) {
        self.state = EntryState::Ready;
    }

    pub fn mark_transcribing(&mut self) {
        self.state = EntryState::Transcribing;
    }

    pub fn mark_uploading(&mut self) {
        self.state = EntryState::Uploading;
    }

    pub fn mark_done(&mut self) {
        self.state = EntryState::Done;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = EntryState::Failed;
        self.failure_reason = Some(reason.into());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, EntryState::Done | EntryState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry() -> PrefetchEntry {
        PrefetchEntry::new(
            "1-0",
            "p/e/e.mp3".to_string(),
            "p/e/e.txt".to_string(),
            "tok",
            PathBuf::from("/cache/audio/p/e/e.mp3"),
            PathBuf::from("/cache/out/p/e/e.txt"),
        )
    }

    #[test]
    fn starts_locked() {
        let entry = make_entry();
        assert_eq!(entry.state, EntryState::Locked);
        assert!(!entry.is_terminal());
    }

    #[test]
    fn walks_the_happy_path() {
        let mut entry = make_entry();
        entry.mark_downloading();
        entry.mark_ready();
        entry.mark_transcribing();
        entry.mark_uploading();
        entry.mark_done();
        assert_eq!(entry.state, EntryState::Done);
        assert!(entry.is_terminal());
    }

    #[test]
    fn failure_records_reason() {
        let mut entry = make_entry();
        entry.mark_downloading();
        entry.mark_failed("connection reset");
        assert_eq!(entry.state, EntryState::Failed);
        assert_eq!(entry.failure_reason.as_deref(), Some("connection reset"));
        assert!(entry.is_terminal());
    }
}
