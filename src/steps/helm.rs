//! Helm step: runs `helm template` and captures the manifest stream.

use crate::config::HelmConfig;
use crate::steps::{Step, StepContext, StepResult};
use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::process::Command;

pub struct HelmStep {
    name: String,
    cfg: HelmConfig,
}

impl HelmStep {
    pub fn new(name: &str, cfg: HelmConfig) -> Self {
        Self {
            name: name.to_string(),
            cfg,
        }
    }
}

impl Step for HelmStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: StepContext) -> Result<StepResult> {
        which::which("helm").map_err(|err| anyhow!("helm binary not found in PATH: {err}"))?;

        let chart = resolve_relative(ctx.work_dir, &self.cfg.chart);

        let mut cmd = Command::new("helm");
        cmd.arg("template")
            .arg(&self.cfg.release_name)
            .arg(&chart)
            .current_dir(ctx.work_dir);

        let namespace = if self.cfg.namespace.is_empty() {
            "default"
        } else {
            self.cfg.namespace.as_str()
        };
        cmd.arg("--namespace").arg(namespace);

        for values_file in &self.cfg.values_files {
            cmd.arg("--values")
                .arg(resolve_relative(ctx.work_dir, values_file));
        }

        for (key, value) in &self.cfg.set {
            cmd.arg("--set").arg(format!("{key}={value}"));
        }

        tracing::info!(step = %self.name, chart = %chart, "running helm template");

        let output = cmd.output().context("running helm")?;
        if !output.status.success() {
            bail!(
                "helm template failed: {}\nstderr: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(StepResult {
            output: output.stdout,
            cleanup: Vec::new(),
        })
    }
}

fn resolve_relative(work_dir: &Path, path: &str) -> String {
    if Path::new(path).is_absolute() {
        path.to_string()
    } else {
        work_dir.join(path).display().to_string()
    }
}
