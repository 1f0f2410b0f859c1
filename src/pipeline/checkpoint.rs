//! Durable snapshots of a document in progress.
//!
//! Each document has exactly one checkpoint file,
//! `<checkpoint_dir>/<document id>.checkpoint.json`, overwritten in place
//! (temp file + rename) every K recorded pages. The revision is the number
//! of pages the snapshot covers, and nothing else in the file depends on
//! when it was written, so checkpointing an unchanged state rewrites the
//! same bytes.
//!
//! The pipeline only reads a checkpoint back when resume is enabled. After
//! the report is written the checkpoint is superseded and removed.

use crate::document::DocumentId;
use crate::error::BatchError;
use crate::output::PageResult;
use crate::pipeline::state::BatchState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Serialised form of a [`BatchState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub document_id: DocumentId,
    /// Display form of the document input (path, URL or directory).
    pub source: String,
    pub model: String,
    pub total_pages: usize,
    /// Pages covered by this snapshot.
    pub revision: usize,
    /// Results for pages `1..=revision`, in order, failures included.
    pub results: Vec<PageResult>,
}

impl Checkpoint {
    pub fn from_state(state: &BatchState, source: &str, model: &str) -> Self {
        Self {
            document_id: state.document_id().clone(),
            source: source.to_string(),
            model: model.to_string(),
            total_pages: state.total_pages(),
            revision: state.recorded(),
            results: state.results().to_vec(),
        }
    }

    /// Check that this checkpoint was taken from the same document.
    pub fn validate(
        &self,
        document_id: &DocumentId,
        source: &str,
        total_pages: usize,
    ) -> Result<(), BatchError> {
        let mismatch = |detail: String| BatchError::CheckpointMismatch {
            document: document_id.to_string(),
            detail,
        };
        if &self.document_id != document_id {
            return Err(mismatch(format!("recorded for '{}'", self.document_id)));
        }
        if self.source != source {
            return Err(mismatch(format!("recorded from '{}'", self.source)));
        }
        if self.total_pages != total_pages {
            return Err(mismatch(format!(
                "recorded {} pages, document now has {}",
                self.total_pages, total_pages
            )));
        }
        if self.revision != self.results.len() || self.revision > total_pages {
            return Err(mismatch(format!(
                "revision {} does not match {} stored results",
                self.revision,
                self.results.len()
            )));
        }
        Ok(())
    }

    /// Rebuild the in-memory state this snapshot was taken from.
    pub fn into_state(self) -> Result<BatchState, BatchError> {
        BatchState::restore(self.document_id, self.total_pages, self.results)
    }
}

/// Where a checkpoint was written and what it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHandle {
    pub path: PathBuf,
    /// Pages covered, equal to the checkpoint's revision.
    pub revision: usize,
}

/// Reads and writes checkpoint files in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, document_id: &DocumentId) -> PathBuf {
        self.dir
            .join(format!("{}.checkpoint.json", document_id.as_str()))
    }

    /// Snapshot `state`, superseding any earlier checkpoint of the document.
    pub async fn checkpoint(
        &self,
        state: &BatchState,
        source: &str,
        model: &str,
    ) -> Result<CheckpointHandle, BatchError> {
        self.write(&Checkpoint::from_state(state, source, model))
            .await
    }

    pub async fn write(&self, checkpoint: &Checkpoint) -> Result<CheckpointHandle, BatchError> {
        let path = self.path_for(&checkpoint.document_id);
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| BatchError::Internal(format!("checkpoint serialisation: {e}")))?;
        write_atomic(&path, &json).await?;

        info!(
            "{}: checkpoint r{} ({}/{} pages) → {}",
            checkpoint.document_id,
            checkpoint.revision,
            checkpoint.revision,
            checkpoint.total_pages,
            path.display()
        );
        Ok(CheckpointHandle {
            path,
            revision: checkpoint.revision,
        })
    }

    /// Latest checkpoint of a document, if one exists.
    pub async fn load(&self, document_id: &DocumentId) -> Result<Option<Checkpoint>, BatchError> {
        let path = self.path_for(document_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BatchError::storage(&path, e)),
        };
        let checkpoint = serde_json::from_slice(&bytes).map_err(|e| {
            BatchError::CheckpointMismatch {
                document: document_id.to_string(),
                detail: format!("{} is unreadable: {e}", path.display()),
            }
        })?;
        debug!("Loaded checkpoint {}", path.display());
        Ok(Some(checkpoint))
    }

    /// Remove a document's checkpoint. A missing file is not an error.
    pub async fn remove(&self, document_id: &DocumentId) -> Result<(), BatchError> {
        let path = self.path_for(document_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed superseded checkpoint {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BatchError::storage(&path, e)),
        }
    }
}

/// Write `bytes` to `path` via a sibling temp file and a rename, so readers
/// see either the previous content or the new one, never a partial file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BatchError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BatchError::storage(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let written = match tokio::fs::write(&tmp_path, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                debug!("Could not remove {}: {}", tmp_path.display(), cleanup);
            }
        }
        return Err(BatchError::storage(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::output::PageOutcome;
    use chrono::{TimeZone, Utc};

    fn result(page: usize, ok: bool) -> PageResult {
        PageResult {
            document_id: DocumentId::new("report"),
            page_index: page,
            outcome: if ok {
                PageOutcome::Extracted {
                    markdown: format!("# Page {page}"),
                }
            } else {
                PageOutcome::Failed {
                    error: PageError::RetriesExhausted {
                        page,
                        attempts: 3,
                        detail: "timed out".into(),
                    },
                }
            },
            completed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, page as u32).unwrap(),
            duration_ms: 100,
            attempts: if ok { 1 } else { 3 },
            input_tokens: 10,
            output_tokens: 5,
        }
    }

    fn state_with(pages: usize, total: usize) -> BatchState {
        let mut state = BatchState::new(DocumentId::new("report"), total);
        for page in 1..=pages {
            state.record(result(page, page != 2)).unwrap();
        }
        state
    }

    #[tokio::test]
    async fn repeated_checkpoint_of_unchanged_state_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"));
        let state = state_with(3, 10);

        let first = store.checkpoint(&state, "report.pdf", "m").await.unwrap();
        let bytes_1 = std::fs::read(&first.path).unwrap();
        let second = store.checkpoint(&state, "report.pdf", "m").await.unwrap();
        let bytes_2 = std::fs::read(&second.path).unwrap();

        assert_eq!(first, second);
        assert_eq!(bytes_1, bytes_2);
    }

    #[tokio::test]
    async fn later_checkpoint_extends_earlier_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let id = DocumentId::new("report");

        store.checkpoint(&state_with(5, 10), "report.pdf", "m").await.unwrap();
        let early = store.load(&id).await.unwrap().unwrap();
        store.checkpoint(&state_with(10, 10), "report.pdf", "m").await.unwrap();
        let late = store.load(&id).await.unwrap().unwrap();

        assert_eq!(early.revision, 5);
        assert_eq!(late.revision, 10);
        assert_eq!(&late.results[..5], &early.results[..]);

        // One file per document, no temp files left behind.
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn load_round_trips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.checkpoint(&state_with(3, 4), "report.pdf", "m").await.unwrap();

        let checkpoint = store.load(&DocumentId::new("report")).await.unwrap().unwrap();
        checkpoint
            .validate(&DocumentId::new("report"), "report.pdf", 4)
            .unwrap();
        let state = checkpoint.into_state().unwrap();
        assert_eq!(state.cursor(), 4);
        assert!(!state.results()[1].is_success());
    }

    #[tokio::test]
    async fn mismatched_checkpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.checkpoint(&state_with(2, 4), "report.pdf", "m").await.unwrap();
        let checkpoint = store.load(&DocumentId::new("report")).await.unwrap().unwrap();

        let err = checkpoint
            .validate(&DocumentId::new("report"), "report.pdf", 7)
            .unwrap_err();
        assert!(matches!(err, BatchError::CheckpointMismatch { .. }));
        assert!(checkpoint
            .validate(&DocumentId::new("report"), "other.pdf", 4)
            .is_err());
    }

    #[tokio::test]
    async fn missing_and_corrupt_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let id = DocumentId::new("report");

        assert!(store.load(&id).await.unwrap().is_none());
        store.remove(&id).await.unwrap();

        std::fs::write(store.path_for(&id), b"{ not json").unwrap();
        let err = store.load(&id).await.unwrap_err();
        assert!(matches!(err, BatchError::CheckpointMismatch { .. }));

        store.remove(&id).await.unwrap();
        assert!(!store.path_for(&id).exists());
    }

    #[tokio::test]
    async fn unwritable_directory_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let store = CheckpointStore::new(&blocker);

        let err = store
            .checkpoint(&state_with(1, 2), "report.pdf", "m")
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Storage { .. }));
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory where the file should go makes the rename fail.
        let target = dir.path().join("doc.checkpoint.json");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        let err = write_atomic(&target, b"{}").await.unwrap_err();
        assert!(matches!(err, BatchError::Storage { .. }));
        assert!(!dir.path().join("doc.checkpoint.json.tmp").exists());
        assert!(target.join("keep").exists());
    }
}
