//! Shared error model, configuration, and template rendering for rostermill.
//!
//! This crate is the foundation depended on by all other rostermill crates.
//! It provides:
//! - [`RostermillError`] — the unified error type
//! - Configuration ([`AppConfig`], [`StageConfig`], config loading)
//! - Prompt template rendering ([`template::render`])

pub mod config;
pub mod error;
pub mod template;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CONFIG_FILE_NAME, DefaultsConfig, LlmConfig, PromptConfig, Prerequisite,
    StageConfig, default_stages, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{Result, RostermillError};
pub use template::render;
