//! CLI argument parsing.
//!
//! The CLI only gathers inputs and overrides; the pipeline itself lives in the
//! coordinator so tests can drive it without a process boundary.
use crate::config::{ConfigOverrides, Normalization};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "snipcheck",
    version,
    about = "Verify fenced code snippets in Markdown docs against their expected output",
    after_help = "Examples:\n  snipcheck check docs/\n  snipcheck check --timeout 5 --workers 2 records.md optional.md\n  snipcheck check --format json --report target/snippets.json docs/\n  snipcheck list docs/\n  snipcheck config > snipcheck.json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Emit debug logging to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Check(CheckArgs),
    List(ListArgs),
    Config(ConfigArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Options shared by every command that needs an effective config.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Config file (default: ./snipcheck.json, then the user config dir)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Per-snippet wall-clock timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Number of snippets executed in parallel
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Default normalization for expected output
    #[arg(long, value_enum, value_name = "MODE")]
    pub normalization: Option<Normalization>,

    /// Executable language tag (repeatable; replaces the configured set)
    #[arg(long = "lang", value_name = "TAG")]
    pub languages: Vec<String>,

    /// Expected-output language tag (repeatable; replaces the configured set)
    #[arg(long = "output-lang", value_name = "TAG")]
    pub output_languages: Vec<String>,
}

impl SettingsArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            timeout_seconds: self.timeout,
            workers: self.workers,
            normalization: self.normalization,
            executable_languages: self.languages.clone(),
            output_languages: self.output_languages.clone(),
        }
    }
}

/// Compile, run and compare every snippet.
#[derive(Parser, Debug)]
#[command(about = "Run every snippet and compare it with its expected output")]
pub struct CheckArgs {
    /// Markdown files or directories to scan
    #[arg(value_name = "PATH", default_value = ".")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Report format written to stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// Extract and pair snippets without running anything.
#[derive(Parser, Debug)]
#[command(about = "List the snippets that would run, with their expected output")]
pub struct ListArgs {
    /// Markdown files or directories to scan
    #[arg(value_name = "PATH", default_value = ".")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
#[command(about = "Print the default (or effective) configuration as JSON")]
pub struct ConfigArgs {
    /// Print the config after file lookup and overrides instead of the defaults
    #[arg(long)]
    pub effective: bool,

    #[command(flatten)]
    pub settings: SettingsArgs,
}
