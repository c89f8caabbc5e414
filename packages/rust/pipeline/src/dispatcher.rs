//! Bounded concurrent dispatch of per-row tasks.
//!
//! All tasks are spawned at once; the admission gate (a counting semaphore)
//! bounds how many remote calls are in flight, and is acquired per attempt
//! inside the task body so permits are never held across backoff sleeps or
//! file I/O. A panicked task is converted into a per-row error outcome; it
//! can never take down sibling tasks or the dispatcher.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;

use crate::tracker::WorkItem;

/// Terminal state of one row's task. `value` is what was (or would be)
/// recorded in the output column.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub key: String,
    pub value: String,
}

/// Spawns row tasks and joins them all, capping in-flight remote calls.
pub struct Dispatcher {
    gate: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(limit: usize) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// The admission gate. Tasks acquire a permit immediately before each
    /// remote attempt and release it (by drop) as soon as the attempt
    /// returns, on every exit path.
    pub fn gate(&self) -> Arc<Semaphore> {
        self.gate.clone()
    }

    /// Run one task per work item and wait for every task to reach a
    /// terminal state. No completion-order guarantee; outcomes are keyed,
    /// never positional.
    pub async fn run_all<F, Fut>(&self, work: Vec<WorkItem>, run: F) -> Vec<Outcome>
    where
        F: Fn(WorkItem) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(work.len());
        for item in work {
            let key = item.key.clone();
            handles.push((key, tokio::spawn(run(item))));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(%key, error = %e, "row task failed");
                    outcomes.push(Outcome {
                        key,
                        value: format!("ERROR: task failed: {e}"),
                    });
                }
            }
        }
        outcomes
    }
}
