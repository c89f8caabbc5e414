//! Stage resolution: merge per-stage overrides over global defaults and load
//! prompt templates up front, so a stage fails fast on configuration
//! problems instead of mid-batch.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use rostermill_shared::{
    AppConfig, PromptConfig, Prerequisite, Result, RostermillError, StageConfig,
};
use rostermill_store::is_missing;

/// Normalize a mapping key for prompt selection: lowercase, with spaces,
/// hyphens, and slashes removed, so `C-Store`, `c store` and `C-store` all
/// select the same template.
pub fn normalize_key(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '/'))
        .collect()
}

/// Prompt templates for one stage, preloaded into memory.
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// Template used for every row (single-file stages), or the fallback
    /// for unmapped values (per-value stages with a fallback).
    default: Option<String>,
    /// Normalized selector value -> template text.
    by_key: HashMap<String, String>,
    /// Column whose value selects the template, for per-value stages.
    selector: Option<String>,
}

impl PromptSet {
    /// Select the template for a row, or `None` when the stage has no
    /// applicable template (unmapped selector value without a fallback —
    /// the row is skipped and its output left blank).
    pub fn select(&self, fields: &HashMap<String, String>) -> Option<&str> {
        match &self.selector {
            None => self.default.as_deref(),
            Some(column) => {
                let value = fields.get(column).map(String::as_str).unwrap_or("");
                self.by_key
                    .get(&normalize_key(value))
                    .map(String::as_str)
                    .or(self.default.as_deref())
            }
        }
    }

    fn load(prompt: &PromptConfig) -> Result<Self> {
        match prompt {
            PromptConfig::File { path } => {
                let text = read_template(Path::new(path))?;
                Ok(Self {
                    default: Some(text),
                    by_key: HashMap::new(),
                    selector: None,
                })
            }
            PromptConfig::PerValue {
                column,
                dir,
                map,
                fallback,
            } => {
                let dir = Path::new(dir);

                // A missing fallback template is fatal; a missing mapped
                // file only drops that mapping, and its rows skip with a
                // warning at plan time.
                let default = match fallback {
                    Some(name) => Some(read_template(&dir.join(name))?),
                    None => None,
                };

                let mut by_key = HashMap::new();
                for (value, file) in map {
                    let path = dir.join(file);
                    match std::fs::read_to_string(&path) {
                        Ok(text) => {
                            by_key.insert(normalize_key(value), text);
                        }
                        Err(e) => {
                            warn!(value, path = %path.display(), error = %e, "prompt template missing, rows with this value will be skipped");
                        }
                    }
                }

                Ok(Self {
                    default,
                    by_key,
                    selector: Some(column.clone()),
                })
            }
        }
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        RostermillError::config(format!("prompt template {}: {e}", path.display()))
    })
}

/// A stage with every tunable resolved and its templates loaded.
#[derive(Debug, Clone)]
pub struct ResolvedStage {
    pub name: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub key_column: String,
    pub output_column: String,
    pub prerequisites: Vec<Prerequisite>,
    pub vars: BTreeMap<String, String>,
    pub prompts: PromptSet,
    pub strip_reasoning: bool,

    pub concurrency: usize,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_unit: Duration,
    pub save_every: usize,

    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub reasoning_effort: Option<String>,
}

impl ResolvedStage {
    /// Merge `stage` over `app`'s defaults and load its prompt templates.
    pub fn resolve(app: &AppConfig, stage: &StageConfig) -> Result<Self> {
        let prompts = PromptSet::load(&stage.prompt)?;

        let input = PathBuf::from(&stage.input);
        let output = stage
            .output
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| input.clone());

        Ok(Self {
            name: stage.name.clone(),
            input,
            output,
            key_column: stage.key_column.clone(),
            output_column: stage.output_column.clone(),
            prerequisites: stage.prerequisites.clone(),
            vars: stage.vars.clone(),
            prompts,
            strip_reasoning: stage.strip_reasoning,
            concurrency: stage.concurrency.unwrap_or(app.defaults.concurrency).max(1),
            request_timeout: Duration::from_secs(
                stage
                    .request_timeout_secs
                    .unwrap_or(app.defaults.request_timeout_secs),
            ),
            max_attempts: stage.max_attempts.unwrap_or(app.defaults.max_attempts).max(1),
            backoff_unit: Duration::from_millis(app.defaults.backoff_ms),
            save_every: stage.save_every.unwrap_or(app.defaults.save_every).max(1),
            model: stage.model.clone().unwrap_or_else(|| app.llm.model.clone()),
            base_url: stage
                .base_url
                .clone()
                .unwrap_or_else(|| app.llm.base_url.clone()),
            api_key_env: stage
                .api_key_env
                .clone()
                .unwrap_or_else(|| app.llm.api_key_env.clone()),
            reasoning_effort: stage
                .reasoning_effort
                .clone()
                .or_else(|| app.llm.reasoning_effort.clone()),
        })
    }

    /// Whether a row's fields satisfy every prerequisite.
    pub fn eligible(&self, fields: &HashMap<String, String>) -> bool {
        self.prerequisites.iter().all(|p| match p {
            Prerequisite::NonEmpty { column } => {
                !is_missing(fields.get(column).map(String::as_str).unwrap_or(""))
            }
            Prerequisite::OneOf { column, allowed } => {
                let value = fields.get(column).map(|v| v.trim()).unwrap_or("");
                allowed.iter().any(|a| a == value)
            }
        })
    }
}
