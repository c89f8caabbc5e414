//! Application and stage configuration for rostermill.
//!
//! Config lives in `rostermill.toml` in the working directory (or behind
//! `--config`). CLI flags override config file values, which override
//! defaults. Every tunable — concurrency, timeout, retries, save cadence,
//! paths, column names, model — is a config value, never a recompile.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RostermillError};

/// Default configuration file name, resolved against the working directory.
pub const CONFIG_FILE_NAME: &str = "rostermill.toml";

// ---------------------------------------------------------------------------
// Config structs (matching rostermill.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global pipeline defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Remote classifier settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Enrichment stages, run in declaration order by `run --all`.
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            llm: LlmConfig::default(),
            stages: default_stages(),
        }
    }
}

impl AppConfig {
    /// Look up a stage by name.
    pub fn find_stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum concurrent classifier calls per stage.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-attempt request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per row before degrading to a recorded error string.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff unit in milliseconds (doubled per failed attempt).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Persist the dataset every N completed rows (1 = after every row).
    #[serde(default = "default_save_every")]
    pub save_every: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            save_every: default_save_every(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}
fn default_request_timeout_secs() -> u64 {
    45
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_save_every() -> usize {
    1
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model for classification calls.
    #[serde(default = "default_model")]
    pub model: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional reasoning effort hint passed with each request.
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
            reasoning_effort: Some("high".into()),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-5".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

// ---------------------------------------------------------------------------
// Stage config
// ---------------------------------------------------------------------------

/// One enrichment stage: a thin configuration of the generic pipeline runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name, used by `run <name>`.
    pub name: String,

    /// Input CSV path.
    pub input: String,

    /// Output CSV path. Defaults to rewriting the input in place. When it
    /// differs from the input and already exists, completed values are
    /// carried forward from it before planning (resume).
    #[serde(default)]
    pub output: Option<String>,

    /// Column whose value uniquely identifies a row across reloads and
    /// concurrent writes. Rows with a blank key are warned about and never
    /// processed; a positional index is never used.
    pub key_column: String,

    /// Column the classification result is written into.
    pub output_column: String,

    /// Eligibility prerequisites; all must hold for a row to be dispatched.
    /// Rows that fail get the output column set to `""` so they are never
    /// retried on a later pass.
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,

    /// Prompt template source.
    pub prompt: PromptConfig,

    /// Extra placeholder aliases: placeholder name -> column name. Row
    /// columns are always available under their own names.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Strip a leading `…</think>` reasoning preamble from responses.
    #[serde(default)]
    pub strip_reasoning: bool,

    // Per-stage overrides of `[defaults]` / `[llm]`.
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub save_every: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

/// A stage eligibility rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prerequisite {
    /// The column must hold a real value: not blank, not `N/A`,
    /// not `Not specified`.
    NonEmpty { column: String },

    /// The trimmed column value must be one of the allowed literals.
    OneOf {
        column: String,
        allowed: Vec<String>,
    },
}

/// Where a stage's prompt template(s) come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptConfig {
    /// A single template file used for every row.
    File { path: String },

    /// A template chosen per row by the (normalized) value of `column`.
    /// `map` goes from raw column value to a file name under `dir`.
    /// Unmapped values use `fallback` when present, otherwise the row is
    /// skipped with a warning and its output left blank.
    PerValue {
        column: String,
        dir: String,
        map: BTreeMap<String, String>,
        #[serde(default)]
        fallback: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Built-in stages
// ---------------------------------------------------------------------------

/// The five standard enrichment stages, in pipeline order.
pub fn default_stages() -> Vec<StageConfig> {
    let blank = |name: &str, input: &str, key: &str, out_col: &str, prompt: PromptConfig| {
        StageConfig {
            name: name.into(),
            input: input.into(),
            output: None,
            key_column: key.into(),
            output_column: out_col.into(),
            prerequisites: Vec::new(),
            prompt,
            vars: BTreeMap::new(),
            strip_reasoning: false,
            concurrency: None,
            request_timeout_secs: None,
            max_attempts: None,
            save_every: None,
            model: None,
            base_url: None,
            api_key_env: None,
            reasoning_effort: None,
        }
    };

    let mut website_info = blank(
        "website-info",
        "data/cleaned_urls.csv",
        "Website URL",
        "Website Information",
        PromptConfig::File {
            path: "prompts/website_info.txt".into(),
        },
    );
    website_info.output = Some("data/website_info.csv".into());
    website_info.vars = BTreeMap::from([("URL".into(), "Website URL".into())]);
    website_info.strip_reasoning = true;
    website_info.concurrency = Some(6);
    website_info.request_timeout_secs = Some(60);
    website_info.max_attempts = Some(1);
    website_info.model = Some("sonar-reasoning".into());
    website_info.base_url = Some("https://api.perplexity.ai".into());
    website_info.api_key_env = Some("PERPLEXITY_API_KEY".into());

    let mut vertical = blank(
        "vertical",
        "data/website_info.csv",
        "Company name",
        "Vertical",
        PromptConfig::File {
            path: "prompts/vertical.txt".into(),
        },
    );
    vertical.prerequisites = vec![Prerequisite::NonEmpty {
        column: "Website Information".into(),
    }];
    vertical.vars = BTreeMap::from([
        ("INFO".into(), "Website Information".into()),
        ("COMPANY".into(), "Company name".into()),
    ]);
    vertical.concurrency = Some(4);

    let mut company_type = blank(
        "company-type",
        "data/website_info_parsed.csv",
        "Company name",
        "Company Type",
        PromptConfig::File {
            path: "prompts/company_type.txt".into(),
        },
    );
    company_type.output = Some("data/company_type.csv".into());
    company_type.prerequisites = vec![Prerequisite::NonEmpty {
        column: "BUSINESS_MODEL".into(),
    }];
    company_type.vars = BTreeMap::from([
        ("company_name".into(), "Company name".into()),
        ("ADDITIONAL_FINDINGS".into(), "ADDITIONAL FINDINGS".into()),
        ("DISTRIBUTION_FINDINGS".into(), "DISTRIBUTION FINDINGS".into()),
    ]);
    company_type.request_timeout_secs = Some(60);
    company_type.save_every = Some(25);

    let mut sub_vertical = blank(
        "sub-vertical",
        "data/company_type.csv",
        "Record ID",
        "Sub Vertical",
        PromptConfig::PerValue {
            column: "Vertical".into(),
            dir: "prompts/sub-verticals".into(),
            map: BTreeMap::from(
                [
                    ("Alcohol", "alcohol.txt"),
                    ("Bakery", "bakery.txt"),
                    ("Beverage", "beverage.txt"),
                    ("Broadline", "broadline.txt"),
                    ("C-Store", "c-store.txt"),
                    ("Ice Cream", "ice-cream.txt"),
                    ("Jan-San", "jan-san.txt"),
                    ("Meat", "meat.txt"),
                    ("Produce", "produce.txt"),
                    ("Seafood", "seafood.txt"),
                ]
                .map(|(k, v)| (k.to_string(), v.to_string())),
            ),
            fallback: Some("sub-vertical-template.txt".into()),
        },
    );
    sub_vertical.prerequisites = vec![Prerequisite::OneOf {
        column: "Vertical".into(),
        allowed: [
            "Alcohol",
            "Bakery",
            "Beverage",
            "Broadline",
            "C-Store",
            "Ice Cream",
            "Jan-San",
            "Meat",
            "Produce",
            "Seafood",
        ]
        .map(String::from)
        .to_vec(),
    }];
    sub_vertical.concurrency = Some(15);
    sub_vertical.save_every = Some(50);

    let mut score = blank(
        "score",
        "data/company_type.csv",
        "Website URL",
        "Score",
        PromptConfig::PerValue {
            column: "Vertical".into(),
            dir: "prompts/scoring".into(),
            map: BTreeMap::from(
                [
                    ("Alcohol", "alcohol.txt"),
                    ("Bakery", "bakery.txt"),
                    ("Beverage", "beverage.txt"),
                    ("Broadline", "broadline.txt"),
                    ("C-Store", "c-store.txt"),
                    ("Coffee", "coffee.txt"),
                    ("Dairy", "dairy.txt"),
                    ("Grocery", "grocery.txt"),
                    ("Ice Cream", "ice-cream.txt"),
                    ("Jan-San", "jan-san.txt"),
                    ("Meat", "meat.txt"),
                    ("Other - Food", "other-food.txt"),
                    ("Produce", "produce.txt"),
                    ("Retail", "retail.txt"),
                    ("Seafood", "seafood.txt"),
                    ("Vegan-Organic-Natural", "vegan-organic-natural.txt"),
                ]
                .map(|(k, v)| (k.to_string(), v.to_string())),
            ),
            fallback: None,
        },
    );
    score.vars = BTreeMap::from(
        [
            ("company_name", "Company name"),
            ("BUSINESS_MODEL", "BUSINESS_MODEL"),
            ("WEBSITE_FINDINGS", "WEBSITE_FINDINGS"),
            ("TARGET_CUSTOMERS", "TARGET_CUSTOMERS"),
            ("DISTRIBUTION_FINDINGS", "DISTRIBUTION FINDINGS"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string())),
    );

    vec![website_info, vertical, company_type, sub_vertical, score]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the application config from `rostermill.toml` in the working
/// directory. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = PathBuf::from(CONFIG_FILE_NAME);

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RostermillError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        RostermillError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Write a default config file at `path`. Refuses to overwrite.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(RostermillError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| RostermillError::config(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| RostermillError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(())
}

/// Resolve the API key for `env_name`, failing fast with a clear message.
pub fn resolve_api_key(env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(RostermillError::config(format!(
            "API key not found. Set the {env_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("website-info"));
        assert!(toml_str.contains("Sub Vertical"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.concurrency, 10);
        assert_eq!(parsed.defaults.max_attempts, 3);
        assert_eq!(parsed.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(parsed.stages.len(), 5);
    }

    #[test]
    fn stage_lookup_and_overrides() {
        let config = AppConfig::default();
        let stage = config.find_stage("website-info").expect("stage exists");
        assert_eq!(stage.key_column, "Website URL");
        assert_eq!(stage.max_attempts, Some(1));
        assert_eq!(stage.api_key_env.as_deref(), Some("PERPLEXITY_API_KEY"));
        assert!(stage.strip_reasoning);

        assert!(config.find_stage("no-such-stage").is_none());
    }

    #[test]
    fn stage_config_parses_from_toml() {
        let toml_str = r#"
[[stages]]
name = "vertical"
input = "data/info.csv"
key_column = "Company name"
output_column = "Vertical"
concurrency = 2

[[stages.prerequisites]]
kind = "non_empty"
column = "Website Information"

[stages.prompt]
kind = "file"
path = "prompts/vertical.txt"

[stages.vars]
INFO = "Website Information"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.stages.len(), 1);
        let stage = &config.stages[0];
        assert_eq!(stage.concurrency, Some(2));
        assert!(matches!(
            stage.prerequisites[0],
            Prerequisite::NonEmpty { ref column } if column == "Website Information"
        ));
        assert!(matches!(stage.prompt, PromptConfig::File { .. }));
        assert_eq!(
            stage.vars.get("INFO").map(String::as_str),
            Some("Website Information")
        );
    }

    #[test]
    fn per_value_prompt_parses() {
        let toml_str = r#"
[[stages]]
name = "score"
input = "data/typed.csv"
key_column = "Website URL"
output_column = "Score"

[stages.prompt]
kind = "per_value"
column = "Vertical"
dir = "prompts/scoring"
fallback = "template.txt"

[stages.prompt.map]
Meat = "meat.txt"
"C-Store" = "c-store.txt"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        match &config.stages[0].prompt {
            PromptConfig::PerValue {
                column,
                map,
                fallback,
                ..
            } => {
                assert_eq!(column, "Vertical");
                assert_eq!(map.get("Meat").map(String::as_str), Some("meat.txt"));
                assert_eq!(fallback.as_deref(), Some("template.txt"));
            }
            other => panic!("expected per_value prompt, got {other:?}"),
        }
    }

    #[test]
    fn api_key_resolution_fails_when_unset() {
        let result = resolve_api_key("RM_TEST_NONEXISTENT_KEY_98765");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("API key not found")
        );
    }
}
