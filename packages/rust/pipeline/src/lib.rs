//! Roster enrichment pipeline: stage resolution, progress tracking, bounded
//! concurrent dispatch, retrying classification, and incremental persistence.

pub mod dispatcher;
pub mod persister;
pub mod runner;
pub mod stage;
pub mod tidy;
pub mod tracker;

pub use dispatcher::{Dispatcher, Outcome};
pub use persister::Persister;
pub use runner::{
    SilentProgress, StageProgress, StageSummary, classifier_for_stage, run_stage, run_stage_with,
};
pub use stage::{PromptSet, ResolvedStage, normalize_key};
pub use tracker::{StagePlan, WorkItem, carry_forward, plan};
