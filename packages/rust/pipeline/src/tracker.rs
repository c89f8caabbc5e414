//! Progress tracking: decide which rows still need processing.
//!
//! Resume is keyed by the stage's designated key column — a stable value
//! that survives reordering of concurrent results. Rows with a blank key
//! are never processed.

use std::collections::HashMap;

use tracing::{debug, warn};

use rostermill_store::Dataset;

use crate::stage::ResolvedStage;

/// One row selected for classification.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Original sequence position in the dataset.
    pub index: usize,
    /// Trimmed key column value.
    pub key: String,
    /// Snapshot of the row, column name -> value.
    pub fields: HashMap<String, String>,
}

/// The tracker's classification of a dataset for one stage run.
#[derive(Debug, Default)]
pub struct StagePlan {
    pub work: Vec<WorkItem>,
    /// Rows whose output column already holds a value.
    pub already_done: usize,
    /// Rows that failed a prerequisite; output explicitly set to `""`.
    pub ineligible: usize,
    /// Rows with a blank key value, left untouched.
    pub missing_key: usize,
}

/// Copy completed output values from a previously saved output dataset into
/// the working dataset, matched by key. Used when a stage writes to a
/// separate file that already exists from an earlier (possibly interrupted)
/// run. Returns the number of values carried forward.
pub fn carry_forward(dataset: &mut Dataset, previous: &Dataset, stage: &ResolvedStage) -> usize {
    let mut completed: HashMap<String, String> = HashMap::new();
    for i in 0..previous.len() {
        let key = previous.get(i, &stage.key_column).trim().to_string();
        let value = previous.get(i, &stage.output_column).trim();
        if !key.is_empty() && !value.is_empty() {
            completed.insert(key, value.to_string());
        }
    }

    let mut carried = 0;
    for i in 0..dataset.len() {
        if !dataset.get(i, &stage.output_column).trim().is_empty() {
            continue;
        }
        let key = dataset.get(i, &stage.key_column).trim().to_string();
        if let Some(value) = completed.get(&key) {
            dataset.set(i, &stage.output_column, value.clone());
            carried += 1;
        }
    }

    debug!(stage = %stage.name, carried, "carried forward completed values");
    carried
}

/// Classify every row of `dataset` into done / ineligible / pending work.
///
/// Ineligible rows get their output column set to the empty marker so they
/// are counted as handled and never classified; everything else either
/// already has output or becomes a [`WorkItem`].
pub fn plan(dataset: &mut Dataset, stage: &ResolvedStage) -> StagePlan {
    let mut plan = StagePlan::default();

    for i in 0..dataset.len() {
        let key = dataset.get(i, &stage.key_column).trim().to_string();
        if key.is_empty() {
            warn!(stage = %stage.name, row = i, key_column = %stage.key_column, "row has no key value, skipping");
            plan.missing_key += 1;
            continue;
        }

        if !dataset.get(i, &stage.output_column).trim().is_empty() {
            plan.already_done += 1;
            continue;
        }

        let fields = dataset.row_fields(i);
        if !stage.eligible(&fields) {
            dataset.set(i, &stage.output_column, "");
            plan.ineligible += 1;
            continue;
        }

        plan.work.push(WorkItem {
            index: i,
            key,
            fields,
        });
    }

    debug!(
        stage = %stage.name,
        pending = plan.work.len(),
        already_done = plan.already_done,
        ineligible = plan.ineligible,
        missing_key = plan.missing_key,
        "stage planned"
    );

    plan
}
