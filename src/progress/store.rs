//! Durable progress state with atomic merge-and-save.

use crate::error::{EtlError, Result};
use crate::models::FileKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

/// Checkpoint of a run.
///
/// Invariants: `processed_file_count == processed_file_keys.len()` after
/// every save, and the key set only grows — keys are never removed, within
/// a run or across reruns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressState {
    /// Last fully-completed page index (1-indexed, 0 when nothing is done).
    pub current_page: u64,
    pub processed_file_count: usize,
    pub processed_file_keys: HashSet<FileKey>,
}

impl ProgressState {
    /// Union `new_keys` into the state and bump the completed page.
    ///
    /// Set-union semantics make this idempotent: merging the same keys
    /// twice yields the same state.
    pub fn merge_keys(&mut self, new_keys: &HashSet<FileKey>, completed_page: u64) {
        self.processed_file_keys.extend(new_keys.iter().cloned());
        self.processed_file_count = self.processed_file_keys.len();
        self.current_page = self.current_page.max(completed_page);
    }
}

/// Durable record of processed work.
///
/// `merge` must be safe under concurrent callers: the whole pipeline's
/// correctness rests on no page's keys being lost between merges.
pub trait ProgressStore: Send + Sync {
    /// Current state. A store with no prior checkpoint returns a fresh
    /// empty state; this must not fail on first run.
    fn load(&self) -> Result<ProgressState>;

    fn contains(&self, key: &FileKey) -> bool;

    /// Atomically union `new_keys`, set `current_page` to
    /// `max(current_page, completed_page)`, and persist durably. A load
    /// immediately after a completed merge reflects it.
    fn merge(&self, new_keys: &HashSet<FileKey>, completed_page: u64) -> Result<()>;
}

/// [`ProgressStore`] persisting to a single JSON file.
///
/// Merges are serialized through one writer lock; persistence is
/// overwrite-whole-file via a temp file renamed into place.
#[derive(Debug)]
pub struct JsonProgressStore {
    path: PathBuf,
    state: Mutex<ProgressState>,
}

impl JsonProgressStore {
    /// Open the checkpoint at `path`, loading prior state if present.
    ///
    /// A missing file yields a fresh state; an unreadable or unparseable
    /// file is a fatal [`EtlError::Checkpoint`] — resuming over a corrupt
    /// checkpoint would re-emit everything it recorded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| EtlError::checkpoint(path.display().to_string(), e.to_string()))?;
            let mut state: ProgressState = serde_json::from_str(&raw)
                .map_err(|e| EtlError::checkpoint(path.display().to_string(), e.to_string()))?;
            state.processed_file_count = state.processed_file_keys.len();
            info!(
                path = %path.display(),
                current_page = state.current_page,
                processed_files = state.processed_file_count,
                "loaded checkpoint"
            );
            state
        } else {
            debug!(path = %path.display(), "no checkpoint found, starting fresh");
            ProgressState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn persist(&self, state: &ProgressState) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        std::fs::create_dir_all(parent)
            .map_err(|e| EtlError::checkpoint(self.path.display().to_string(), e.to_string()))?;

        let mut file = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| EtlError::checkpoint(self.path.display().to_string(), e.to_string()))?;
        serde_json::to_writer_pretty(&mut file, state)
            .map_err(|e| EtlError::checkpoint(self.path.display().to_string(), e.to_string()))?;
        file.flush()
            .map_err(|e| EtlError::checkpoint(self.path.display().to_string(), e.to_string()))?;
        file.persist(&self.path)
            .map_err(|e| EtlError::checkpoint(self.path.display().to_string(), e.to_string()))?;
        Ok(())
    }
}

impl ProgressStore for JsonProgressStore {
    fn load(&self) -> Result<ProgressState> {
        Ok(self.state.lock().clone())
    }

    fn contains(&self, key: &FileKey) -> bool {
        self.state.lock().processed_file_keys.contains(key)
    }

    fn merge(&self, new_keys: &HashSet<FileKey>, completed_page: u64) -> Result<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.merge_keys(new_keys, completed_page);
        self.persist(&next)?;
        debug!(
            completed_page,
            new_keys = new_keys.len(),
            processed_files = next.processed_file_count,
            "merged checkpoint"
        );
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(instance_id: i64) -> FileKey {
        FileKey {
            study_id: 1,
            series_id: 2,
            instance_id,
            file_path: format!("files/{instance_id}.dcm"),
        }
    }

    #[test]
    fn missing_checkpoint_yields_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::open(dir.path().join("progress.json")).unwrap();
        assert_eq!(store.load().unwrap(), ProgressState::default());
    }

    #[test]
    fn merge_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let store = JsonProgressStore::open(&path).unwrap();
        let keys = HashSet::from([key(100), key(200)]);
        store.merge(&keys, 3).unwrap();
        let saved = store.load().unwrap();
        drop(store);

        let reopened = JsonProgressStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), saved);
        assert!(reopened.contains(&key(100)));
        assert_eq!(reopened.load().unwrap().current_page, 3);
    }

    #[test]
    fn merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::open(dir.path().join("progress.json")).unwrap();

        let keys = HashSet::from([key(100)]);
        store.merge(&keys, 1).unwrap();
        store.merge(&keys, 1).unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.processed_file_count, 1);
        assert_eq!(state.processed_file_keys.len(), 1);
    }

    #[test]
    fn current_page_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::open(dir.path().join("progress.json")).unwrap();

        store.merge(&HashSet::from([key(100)]), 3).unwrap();
        store.merge(&HashSet::from([key(200)]), 2).unwrap();

        assert_eq!(store.load().unwrap().current_page, 3);
    }

    #[test]
    fn count_tracks_set_size_after_every_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::open(dir.path().join("progress.json")).unwrap();

        store.merge(&HashSet::from([key(100), key(200)]), 1).unwrap();
        store.merge(&HashSet::from([key(200), key(300)]), 2).unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.processed_file_keys.len(), 3);
        assert_eq!(state.processed_file_count, 3);
    }

    #[test]
    fn corrupt_checkpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{ not json").unwrap();

        match JsonProgressStore::open(&path) {
            Err(EtlError::Checkpoint { .. }) => {}
            other => panic!("expected checkpoint error, got {other:?}"),
        }
    }
}
