//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use rostermill_pipeline::tidy::{self, CleanUrlsOptions};
use rostermill_pipeline::{StageProgress, StageSummary, run_stage};
use rostermill_shared::{
    AppConfig, CONFIG_FILE_NAME, init_config, load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// rostermill — enrich company rosters with LLM classification.
#[derive(Parser)]
#[command(
    name = "rostermill",
    version,
    about = "Run LLM classification stages over CSV company rosters.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Path to the config file (defaults to rostermill.toml in the
    /// working directory; built-in defaults when absent).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one classification stage, or all of them in order.
    Run {
        /// Stage name (see `rostermill stages`).
        stage: Option<String>,

        /// Run every configured stage in order.
        #[arg(long, conflicts_with = "stage")]
        all: bool,
    },

    /// List the configured stages.
    Stages,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Dataset cleanup utilities.
    Tidy {
        /// Tidy subcommand.
        #[command(subcommand)]
        action: TidyAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a config file with the default stages.
    Init,
    /// Show the resolved configuration.
    Show,
}

/// Tidy subcommands.
#[derive(Subcommand)]
pub(crate) enum TidyAction {
    /// Normalize a URL column to homepages and drop blocklisted hosts.
    CleanUrls {
        /// Input CSV.
        input: PathBuf,

        /// Output CSV.
        output: PathBuf,

        /// Column holding the URL.
        #[arg(long, default_value = "Website URL")]
        url_column: String,

        /// Columns to keep in the output (repeatable).
        #[arg(long = "keep", default_values = ["Record ID", "Company name", "Website URL"])]
        keep_columns: Vec<String>,

        /// Drop rows whose URL contains this substring (repeatable).
        #[arg(long = "block", default_values = ["google", "outlook", "yahoo"])]
        blocklist: Vec<String>,
    },

    /// Blank recorded `ERROR ...` values so the next run retries them.
    ClearErrors {
        /// CSV to clean in place.
        path: PathBuf,

        /// Column to scan.
        #[arg(long)]
        column: String,
    },

    /// Replace oversized values with N/A.
    Truncate {
        /// CSV to clean in place.
        path: PathBuf,

        /// Column to scan.
        #[arg(long, default_value = "Website Information")]
        column: String,

        /// Column reported for truncated rows.
        #[arg(long, default_value = "Website URL")]
        key_column: String,

        /// Maximum value length in characters.
        #[arg(long, default_value = "7500")]
        threshold: usize,
    },

    /// Explode a labeled free-text column into per-category columns.
    ParseInfo {
        /// Input CSV.
        input: PathBuf,

        /// Output CSV.
        output: PathBuf,

        /// Column holding the labeled blob.
        #[arg(long, default_value = "Website Information")]
        column: String,

        /// Additional columns to omit from the output (repeatable).
        #[arg(long = "drop", default_values = ["Vertical"])]
        drop_columns: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "rostermill=info",
        1 => "rostermill=debug",
        _ => "rostermill=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

fn load(cli_config: Option<&PathBuf>) -> Result<AppConfig> {
    match cli_config {
        Some(path) => Ok(load_config_from(path)?),
        None => Ok(load_config()?),
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Run { stage, all } => cmd_run(config_path.as_ref(), stage.as_deref(), all).await,
        Command::Stages => cmd_stages(config_path.as_ref()),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path.as_ref()),
            ConfigAction::Show => cmd_config_show(config_path.as_ref()),
        },
        Command::Tidy { action } => cmd_tidy(action),
    }
}

async fn cmd_run(config: Option<&PathBuf>, stage: Option<&str>, all: bool) -> Result<()> {
    let app = load(config)?;

    let stages: Vec<_> = if all {
        app.stages.iter().collect()
    } else {
        let name = stage.ok_or_else(|| eyre!("give a stage name or --all"))?;
        let stage = app
            .find_stage(name)
            .ok_or_else(|| {
                let known: Vec<&str> = app.stages.iter().map(|s| s.name.as_str()).collect();
                eyre!("unknown stage '{name}': expected one of {}", known.join(", "))
            })?;
        vec![stage]
    };

    for stage in stages {
        info!(stage = %stage.name, input = %stage.input, "running stage");

        let progress = Arc::new(CliProgress::new());
        let summary = run_stage(&app, stage, progress).await?;
        print_summary(&summary);
    }

    Ok(())
}

fn print_summary(summary: &StageSummary) {
    println!();
    println!("  Stage '{}' finished", summary.stage);
    println!("  Rows:         {}", summary.total_rows);
    println!("  Already done: {}", summary.already_done);
    if summary.carried_forward > 0 {
        println!("  Carried:      {}", summary.carried_forward);
    }
    println!("  Ineligible:   {}", summary.ineligible);
    if summary.missing_key > 0 {
        println!("  Missing key:  {}", summary.missing_key);
    }
    println!("  Classified:   {}", summary.succeeded);
    if summary.skipped_no_prompt > 0 {
        println!("  No prompt:    {}", summary.skipped_no_prompt);
    }
    println!("  Failed:       {}", summary.failed);
    println!("  Time:         {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

fn cmd_stages(config: Option<&PathBuf>) -> Result<()> {
    let app = load(config)?;
    for stage in &app.stages {
        let output = stage.output.as_deref().unwrap_or("(in place)");
        println!(
            "  {:<14} {} -> {}  [{} -> {}]",
            stage.name, stage.input, output, stage.key_column, stage.output_column
        );
    }
    Ok(())
}

fn cmd_config_init(config: Option<&PathBuf>) -> Result<()> {
    let default_path = PathBuf::from(CONFIG_FILE_NAME);
    let path = config.unwrap_or(&default_path);
    init_config(path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: Option<&PathBuf>) -> Result<()> {
    let app = load(config)?;
    let toml_str = toml::to_string_pretty(&app)?;
    println!("{toml_str}");
    Ok(())
}

fn cmd_tidy(action: TidyAction) -> Result<()> {
    match action {
        TidyAction::CleanUrls {
            input,
            output,
            url_column,
            keep_columns,
            blocklist,
        } => {
            let opts = CleanUrlsOptions {
                url_column,
                keep_columns,
                blocklist,
            };
            let report = tidy::clean_urls(&input, &output, &opts)?;
            println!(
                "Kept {} rows, dropped {} ({})",
                report.kept,
                report.dropped,
                output.display()
            );
        }
        TidyAction::ClearErrors { path, column } => {
            let cleared = tidy::clear_errors(&path, &column)?;
            println!("Blanked {cleared} error values in '{column}'");
        }
        TidyAction::Truncate {
            path,
            column,
            key_column,
            threshold,
        } => {
            let report = tidy::truncate_long_fields(&path, &column, &key_column, threshold)?;
            println!(
                "Truncated {} / {} rows over {} chars",
                report.truncated, report.total, threshold
            );
            for key in &report.keys {
                println!("  {key}");
            }
        }
        TidyAction::ParseInfo {
            input,
            output,
            column,
            drop_columns,
        } => {
            let drops: Vec<&str> = drop_columns.iter().map(String::as_str).collect();
            let rows = tidy::parse_info(
                &input,
                &output,
                &column,
                tidy::DEFAULT_CATEGORIES,
                &drops,
            )?;
            println!("Parsed {} rows into {}", rows, output.display());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Stage progress bar using indicatif.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl StageProgress for CliProgress {
    fn begin(&self, stage: &str, pending: usize) {
        self.bar.set_length(pending as u64);
        self.bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .expect("valid progress template"),
        );
        self.bar.set_message(stage.to_string());
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn row_done(&self, key: &str, failed: bool) {
        self.bar.inc(1);
        if failed {
            self.bar.set_message(format!("failed: {key}"));
        } else {
            self.bar.set_message(key.to_string());
        }
    }

    fn finish(&self, _stage: &str) {
        self.bar.finish_and_clear();
    }
}
