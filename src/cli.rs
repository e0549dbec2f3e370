//! CLI argument parsing for the render pipeline tool.
//!
//! The CLI is intentionally thin: it selects a run mode and hands the
//! directories and context file to the engine, which owns all policy.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "many",
    version,
    about = "Render template trees into deployment-ready manifests",
    after_help = "Examples:\n  many run --input-dir ./src --output-dir ./rendered --context-file ./context.yaml\n  many run --input-dir ./src --output-dir ./rendered --pipeline ./src/app/.many.yaml\n  many instances --instances ./instances.yaml --input-dir ./src --output-dir ./rendered",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Instances(InstancesArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    Text,
    Json,
    Pretty,
}

/// Discovery mode: copy the input tree and run every pipeline found in it.
#[derive(Parser, Debug)]
#[command(about = "Copy the input tree and run its pipelines")]
pub struct RunArgs {
    /// Input directory containing template trees and .many.yaml files
    #[arg(long, value_name = "DIR")]
    pub input_dir: PathBuf,

    /// Output directory the rendered tree is written to
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Delete and recreate the output directory first
    #[arg(long)]
    pub overwrite: bool,

    /// Global context YAML file merged beneath every pipeline context
    #[arg(long, value_name = "FILE")]
    pub context_file: Option<PathBuf>,

    /// Max directory recursion depth (-1 = unlimited, 0 = root only)
    #[arg(long, value_name = "N", default_value_t = -1, allow_hyphen_values = true)]
    pub max_depth: i32,

    /// Run a single .many.yaml instead of discovering all of them
    #[arg(long, value_name = "FILE")]
    pub pipeline: Option<PathBuf>,
}

/// Instances mode: fan the whole run out over independent instances.
#[derive(Parser, Debug)]
#[command(about = "Run the pipelines once per configured instance")]
pub struct InstancesArgs {
    /// Instances YAML file
    #[arg(long, value_name = "FILE")]
    pub instances: PathBuf,

    /// Input directory containing template trees and .many.yaml files
    #[arg(long, value_name = "DIR")]
    pub input_dir: PathBuf,

    /// Output directory the rendered trees are written to
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Delete and recreate the output directory first
    #[arg(long)]
    pub overwrite: bool,

    /// Global context YAML file merged beneath every instance context
    #[arg(long, value_name = "FILE")]
    pub context_file: Option<PathBuf>,

    /// Max directory recursion depth (-1 = unlimited, 0 = root only)
    #[arg(long, value_name = "N", default_value_t = -1, allow_hyphen_values = true)]
    pub max_depth: i32,
}
