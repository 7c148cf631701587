//! Local-directory staging: an operational extra (not queue-driven) for
//! pre-staging a batch of audio on fast local disk ahead of a GPU pass, and
//! for claiming staged files one at a time without a broker. Grounded on
//! the source's `--staging-dir`/`--download-only` path, `iter_local_audio`,
//! and `claim_file`.

use podscribe_core::StoreError;
use podscribe_store::ObjectStore;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingReport {
    pub scanned: u64,
    pub downloaded: u64,
}

/// Downloads every audio key under `prefix` into `staging_dir`, preserving
/// the key's path, skipping files already staged. Mirrors `download-only`.
pub async fn stage_local(
    store: &dyn ObjectStore,
    prefix: Option<&str>,
    staging_dir: &Path,
) -> Result<StagingReport, StoreError> {
    let keys = store.list(prefix).await?;
    let mut scanned = 0u64;
    let mut downloaded = 0u64;

    for key in keys {
        if !podscribe_core::is_audio_key(&key) {
            continue;
        }
        scanned += 1;

        let local_path = staging_dir.join(&key);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| StoreError::Failed {
                key: key.clone(),
                kind: e.to_string(),
            })?;
        }
        let already_staged = tokio::fs::metadata(&local_path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if already_staged {
            continue;
        }
        store.get(&key, &local_path).await?;
        downloaded += 1;
    }

    Ok(StagingReport { scanned, downloaded })
}

/// Walks `root` for staged audio files, skipping any still marked
/// `.inprogress` by a concurrent `claim_file` call.
pub fn iter_local_audio(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".inprogress") {
                continue;
            }
            if podscribe_core::is_audio_key(name) {
                out.push(path);
            }
        }
    }
    out
}

/// Atomically renames `path` to `<path>.inprogress` so exactly one claimer
/// wins when several local workers scan the same staging directory.
/// Returns `None` if the file is gone or the rename otherwise fails.
pub fn claim_file(path: &Path) -> Option<PathBuf> {
    let mut claimed = path.as_os_str().to_owned();
    claimed.push(".inprogress");
    let claimed = PathBuf::from(claimed);
    std::fs::rename(path, &claimed).ok()?;
    Some(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use podscribe_store::InMemoryObjectStore;

    #[tokio::test]
    async fn stage_local_downloads_audio_and_skips_already_staged() {
        let store = InMemoryObjectStore::new();
        store.seed("p/e1/e1.mp3", b"audio".to_vec());
        let dir = tempfile::tempdir().unwrap();

        let report = stage_local(&store, None, dir.path()).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.downloaded, 1);

        let report = stage_local(&store, None, dir.path()).await.unwrap();
        assert_eq!(report.downloaded, 0, "already-staged file is skipped on a second pass");
    }

    #[test]
    fn iter_local_audio_skips_inprogress_and_non_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"audio").unwrap();
        std::fs::write(dir.path().join("b.mp3.inprogress"), b"claimed").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"notes").unwrap();

        let found = iter_local_audio(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name().unwrap(), "a.mp3");
    }

    #[test]
    fn claim_file_renames_atomically_and_is_idempotent_against_double_claim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let claimed = claim_file(&path).unwrap();
        assert!(claimed.ends_with("a.mp3.inprogress"));
        assert!(claim_file(&path).is_none(), "second claim finds nothing left to rename");
    }
}
