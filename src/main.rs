use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde_yaml::Mapping;
use std::fs;
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod context;
mod discover;
mod engine;
mod instances;
mod steps;

use cli::{Command, InstancesArgs, LogFormat, RootArgs, RunArgs};

fn main() -> Result<()> {
    let args = RootArgs::parse();

    init_logging(args.log_format, &args.log_level)?;
    load_dotenv()?;

    match args.command {
        Command::Run(run) => cmd_run(run)?,
        Command::Instances(inst) => cmd_instances(inst)?,
    }

    info!("done");
    Ok(())
}

fn cmd_run(args: RunArgs) -> Result<()> {
    check_input_directory(&args.input_dir)?;
    ensure_output_directory(&args.output_dir, args.overwrite)?;
    let global_context = load_global_context(args.context_file.as_deref())?;

    match &args.pipeline {
        Some(pipeline_file) => engine::run_single(
            pipeline_file,
            &args.input_dir,
            &args.output_dir,
            &global_context,
            args.context_file.as_deref(),
        ),
        None => engine::run_all(
            &args.input_dir,
            &args.output_dir,
            &global_context,
            args.max_depth,
            args.context_file.as_deref(),
        ),
    }
}

fn cmd_instances(args: InstancesArgs) -> Result<()> {
    check_input_directory(&args.input_dir)?;
    ensure_output_directory(&args.output_dir, args.overwrite)?;
    let global_context = load_global_context(args.context_file.as_deref())?;

    let cfg = instances::load_instances(&args.instances)?;

    for inst in &cfg.instances {
        let inst_input_dir = if inst.input.is_empty() {
            args.input_dir.clone()
        } else {
            args.input_dir.join(&inst.input)
        };
        if !inst_input_dir.is_dir() {
            bail!(
                "instance {:?}: input {} is not a directory",
                inst.name,
                inst_input_dir.display()
            );
        }
    }

    engine::run_instances(
        &cfg,
        &args.input_dir,
        &args.output_dir,
        &global_context,
        args.max_depth,
        args.context_file.as_deref(),
    )
}

fn init_logging(format: LogFormat, level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| anyhow!("could not parse log level {level:?}: {err}"))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
    Ok(())
}

fn load_dotenv() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "using .env file"),
        Err(err) if err.not_found() => info!("no .env file found"),
        Err(err) => return Err(err).context("loading .env"),
    }
    Ok(())
}

fn load_global_context(context_file: Option<&Path>) -> Result<Mapping> {
    match context_file {
        Some(path) => context::load_context_file(path),
        None => Ok(Mapping::new()),
    }
}

fn check_input_directory(input_dir: &Path) -> Result<()> {
    let meta = fs::metadata(input_dir)
        .with_context(|| format!("checking input directory {}", input_dir.display()))?;
    if !meta.is_dir() {
        bail!("--input-dir {} is not a directory", input_dir.display());
    }
    Ok(())
}

fn ensure_output_directory(output_dir: &Path, overwrite: bool) -> Result<()> {
    if overwrite && output_dir.exists() {
        fs::remove_dir_all(output_dir)
            .with_context(|| format!("cleaning output directory {}", output_dir.display()))?;
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;
    Ok(())
}
