//! Incremental persistence of classification results.
//!
//! Results land in an in-memory dataset behind a mutex and are flushed to
//! disk atomically on a configurable cadence. Merging happens by key against
//! the in-memory state, never by re-reading the file, so concurrent
//! completions can't clobber each other.

use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use rostermill_store::Dataset;

struct PersisterState {
    dataset: Dataset,
    completed: usize,
}

/// Serializes result recording and writes the dataset out atomically every
/// `save_every` completions (and once more on [`flush`](Persister::flush)).
pub struct Persister {
    path: PathBuf,
    key_column: String,
    output_column: String,
    save_every: usize,
    state: Mutex<PersisterState>,
}

impl Persister {
    pub fn new(
        dataset: Dataset,
        path: PathBuf,
        key_column: impl Into<String>,
        output_column: impl Into<String>,
        save_every: usize,
    ) -> Self {
        Self {
            path,
            key_column: key_column.into(),
            output_column: output_column.into(),
            save_every: save_every.max(1),
            state: Mutex::new(PersisterState {
                dataset,
                completed: 0,
            }),
        }
    }

    /// Record one row's result, merged by key. Interim saves are best
    /// effort: a failed write logs a warning and processing continues, the
    /// next save (or the final flush) retries the full state.
    pub async fn record(&self, key: &str, value: &str) {
        let mut state = self.state.lock().await;

        let Some(row) = state.dataset.find_by_key(&self.key_column, key) else {
            warn!(key, key_column = %self.key_column, "result for unknown key, dropping");
            return;
        };
        state.dataset.set(row, &self.output_column, value);
        state.completed += 1;

        if state.completed % self.save_every == 0 {
            if let Err(e) = state.dataset.save(&self.path) {
                warn!(path = %self.path.display(), error = %e, "interim save failed");
            } else {
                debug!(
                    path = %self.path.display(),
                    completed = state.completed,
                    "interim save"
                );
            }
        }
    }

    /// Final atomic save of the full dataset.
    pub async fn flush(&self) -> rostermill_shared::Result<()> {
        let state = self.state.lock().await;
        state.dataset.save(&self.path)
    }

    /// Number of results recorded so far.
    pub async fn completed(&self) -> usize {
        self.state.lock().await.completed
    }

    /// Consume the persister and hand back the merged dataset.
    pub fn into_dataset(self) -> Dataset {
        self.state.into_inner().dataset
    }
}
