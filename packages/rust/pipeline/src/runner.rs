//! Stage execution: plan, dispatch, classify, persist.
//!
//! One generic runner drives every stage; the differences between stages
//! (columns, prompts, prerequisites, tunables) live entirely in
//! [`ResolvedStage`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use rostermill_classifier::{ClassifierConfig, RemoteClassifier, RetryPolicy};
use rostermill_shared::{AppConfig, Result, StageConfig, render, resolve_api_key};
use rostermill_store::Dataset;

use crate::dispatcher::{Dispatcher, Outcome};
use crate::persister::Persister;
use crate::stage::ResolvedStage;
use crate::tracker::{self, StagePlan};

/// What one stage run did, for logging and CLI reporting.
#[derive(Debug, Default)]
pub struct StageSummary {
    pub stage: String,
    pub total_rows: usize,
    pub already_done: usize,
    pub ineligible: usize,
    pub missing_key: usize,
    pub carried_forward: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_no_prompt: usize,
    pub elapsed: Duration,
}

/// Progress callbacks for long-running stages. The runner calls these from
/// concurrent tasks; implementations must be cheap and thread-safe.
pub trait StageProgress: Send + Sync {
    fn begin(&self, _stage: &str, _pending: usize) {}
    fn row_done(&self, _key: &str, _failed: bool) {}
    fn finish(&self, _stage: &str) {}
}

/// No-op progress, for tests and library callers.
pub struct SilentProgress;

impl StageProgress for SilentProgress {}

/// Build the remote classifier for a stage, failing fast when the
/// credential env var is unset.
pub fn classifier_for_stage(stage: &ResolvedStage) -> Result<RemoteClassifier> {
    let api_key = resolve_api_key(&stage.api_key_env)?;
    RemoteClassifier::new(ClassifierConfig {
        base_url: stage.base_url.clone(),
        api_key,
        model: stage.model.clone(),
        reasoning_effort: stage.reasoning_effort.clone(),
        request_timeout: stage.request_timeout,
    })
}

/// Run one stage end to end.
pub async fn run_stage(
    app: &AppConfig,
    stage: &StageConfig,
    progress: Arc<dyn StageProgress>,
) -> Result<StageSummary> {
    let resolved = ResolvedStage::resolve(app, stage)?;
    let classifier = classifier_for_stage(&resolved)?;
    run_stage_with(resolved, classifier, progress).await
}

/// Run an already-resolved stage with a caller-supplied classifier.
pub async fn run_stage_with(
    stage: ResolvedStage,
    classifier: RemoteClassifier,
    progress: Arc<dyn StageProgress>,
) -> Result<StageSummary> {
    let started = Instant::now();
    let mut summary = StageSummary {
        stage: stage.name.clone(),
        ..Default::default()
    };

    let mut dataset = Dataset::load(&stage.input)?;
    dataset.require_columns(&[&stage.key_column])?;
    if dataset.ensure_column(&stage.output_column) {
        info!(stage = %stage.name, column = %stage.output_column, "added output column");
    }
    summary.total_rows = dataset.len();

    // A separate output file from an earlier run holds completed work that
    // the input doesn't; fold it in before planning.
    if stage.output != stage.input && stage.output.exists() {
        let previous = Dataset::load(&stage.output)?;
        if previous.column_index(&stage.output_column).is_some() {
            summary.carried_forward = tracker::carry_forward(&mut dataset, &previous, &stage);
        }
    }

    let StagePlan {
        work,
        already_done,
        ineligible,
        missing_key,
    } = tracker::plan(&mut dataset, &stage);
    summary.already_done = already_done;
    summary.ineligible = ineligible;
    summary.missing_key = missing_key;
    summary.dispatched = work.len();

    info!(
        stage = %stage.name,
        total = summary.total_rows,
        pending = work.len(),
        already_done,
        ineligible,
        missing_key,
        carried = summary.carried_forward,
        "stage starting"
    );

    let persister = Arc::new(Persister::new(
        dataset,
        stage.output.clone(),
        stage.key_column.clone(),
        stage.output_column.clone(),
        stage.save_every,
    ));

    if work.is_empty() {
        // Still persist: carried values, ineligible markers, and the output
        // column itself must reach the output file.
        persister.flush().await?;
        summary.elapsed = started.elapsed();
        info!(stage = %summary.stage, "nothing to do");
        return Ok(summary);
    }

    progress.begin(&stage.name, work.len());

    let dispatcher = Dispatcher::new(stage.concurrency);
    let gate = dispatcher.gate();
    let retry = RetryPolicy::new(stage.max_attempts, stage.backoff_unit);
    let skipped = Arc::new(AtomicUsize::new(0));

    let stage = Arc::new(stage);
    let outcomes = dispatcher
        .run_all(work, |item| {
            let stage = stage.clone();
            let classifier = classifier.clone();
            let retry = retry.clone();
            let gate = gate.clone();
            let persister = persister.clone();
            let progress = progress.clone();
            let skipped = skipped.clone();

            async move {
                let Some(template) = stage.prompts.select(&item.fields) else {
                    warn!(stage = %stage.name, key = %item.key, "no prompt template for row, skipping");
                    skipped.fetch_add(1, Ordering::SeqCst);
                    progress.row_done(&item.key, false);
                    return Outcome {
                        key: item.key,
                        value: String::new(),
                    };
                };

                // Columns are addressable under their own names; `vars`
                // adds aliases (placeholder name -> column name) on top.
                let mut context = item.fields.clone();
                for (alias, column) in stage.vars.iter() {
                    let value = item.fields.get(column).cloned().unwrap_or_default();
                    context.insert(alias.clone(), value);
                }
                let prompt = render(template, &context);

                // The gate permit covers exactly one remote attempt: it is
                // released before any backoff sleep or save.
                let mut value = retry
                    .run(|| {
                        let gate = gate.clone();
                        let classifier = classifier.clone();
                        let prompt = prompt.clone();
                        async move {
                            let _permit = gate.acquire_owned().await.expect("gate closed");
                            classifier.classify(&prompt).await
                        }
                    })
                    .await;

                if stage.strip_reasoning {
                    value = strip_reasoning_block(&value);
                }

                let failed = value.starts_with("ERROR");
                persister.record(&item.key, &value).await;
                progress.row_done(&item.key, failed);

                Outcome {
                    key: item.key,
                    value,
                }
            }
        })
        .await;

    persister.flush().await?;
    progress.finish(&stage.name);

    summary.failed = outcomes
        .iter()
        .filter(|o| o.value.starts_with("ERROR"))
        .count();
    summary.skipped_no_prompt = skipped.load(Ordering::SeqCst);
    summary.succeeded = summary.dispatched - summary.failed - summary.skipped_no_prompt;
    summary.elapsed = started.elapsed();

    info!(
        stage = %summary.stage,
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped_no_prompt,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "stage finished"
    );

    Ok(summary)
}

/// Drop a `<think>…</think>` reasoning block from a model response, keeping
/// everything after the closing tag.
fn strip_reasoning_block(text: &str) -> String {
    match text.split_once("</think>") {
        Some((_, rest)) => rest.trim().to_string(),
        None => text.trim().to_string(),
    }
}
