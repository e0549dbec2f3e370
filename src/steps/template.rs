//! Template step: renders files under the work dir in place.

use crate::config::TemplateConfig;
use crate::context::render_str;
use crate::steps::{Step, StepContext, StepResult};
use anyhow::{anyhow, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_yaml::Mapping;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DEFAULT_INCLUDE: &str = "**/*";

pub struct TemplateStep {
    name: String,
    cfg: TemplateConfig,
}

impl TemplateStep {
    pub fn new(name: &str, cfg: TemplateConfig) -> Self {
        Self {
            name: name.to_string(),
            cfg,
        }
    }
}

impl Step for TemplateStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: StepContext) -> Result<StepResult> {
        let files = filter_files(
            ctx.work_dir,
            &self.cfg.files.include,
            &self.cfg.files.exclude,
        )
        .context("filtering files")?;

        tracing::info!(step = %self.name, count = files.len(), "template step processing files");

        for file in &files {
            process_file(ctx.work_dir, file, ctx.template_data)
                .with_context(|| format!("processing {}", file.display()))?;
        }

        Ok(StepResult::default())
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("glob {pattern:?}"))?;
        builder.add(glob);
    }
    builder.build().context("building glob set")
}

/// Lists files under `work_dir` (relative paths, sorted) matching any
/// include pattern and no exclude pattern. An empty include list matches
/// everything.
fn filter_files(work_dir: &Path, include: &[String], exclude: &[String]) -> Result<Vec<PathBuf>> {
    let default_include = vec![DEFAULT_INCLUDE.to_string()];
    let include: &[String] = if include.is_empty() {
        &default_include
    } else {
        include
    };

    let included = build_glob_set(include).context("include filter")?;
    let excluded = build_glob_set(exclude).context("exclude filter")?;

    let mut result = Vec::new();
    for entry in WalkDir::new(work_dir) {
        let entry = entry.context("walking work dir")?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(work_dir)
            .map_err(|_| anyhow!("path {} escapes work dir", entry.path().display()))?;
        if included.is_match(rel) && !excluded.is_match(rel) {
            result.push(rel.to_path_buf());
        }
    }
    result.sort();
    Ok(result)
}

fn process_file(work_dir: &Path, filename: &Path, data: &Mapping) -> Result<()> {
    let abs = work_dir.join(filename);

    let content = fs::read_to_string(&abs).context("reading file")?;
    let rendered = render_str(&content, data).context("rendering template")?;
    fs::write(&abs, rendered).context("writing rendered file")?;

    tracing::debug!(file = %filename.display(), "template rendered");
    Ok(())
}
