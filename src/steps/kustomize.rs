//! Kustomize step: runs `kustomize build` and captures the manifest stream.

use crate::config::KustomizeConfig;
use crate::steps::{Step, StepContext, StepResult};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::process::Command;

const KUSTOMIZATION_FILENAME: &str = "kustomization.yaml";
const HELM_CHARTS_DIR: &str = "charts";

pub struct KustomizeStep {
    name: String,
    cfg: KustomizeConfig,
}

impl KustomizeStep {
    pub fn new(name: &str, cfg: KustomizeConfig) -> Self {
        Self {
            name: name.to_string(),
            cfg,
        }
    }
}

impl Step for KustomizeStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: StepContext) -> Result<StepResult> {
        which::which("kustomize")
            .map_err(|err| anyhow::anyhow!("kustomize binary not found in PATH: {err}"))?;

        let dir = if self.cfg.dir.is_empty() {
            "."
        } else {
            self.cfg.dir.as_str()
        };
        let dir = ctx.work_dir.join(dir);

        let mut cmd = Command::new("kustomize");
        cmd.arg("build").arg(&dir).current_dir(ctx.work_dir);
        if self.cfg.enable_helm {
            cmd.arg("--enable-helm");
        }

        tracing::info!(
            step = %self.name,
            dir = %dir.display(),
            enable_helm = self.cfg.enable_helm,
            "running kustomize"
        );

        let output = cmd.output().context("running kustomize")?;
        if !output.status.success() {
            bail!(
                "kustomize build failed: {}\nstderr: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let cleanup = if self.cfg.enable_helm {
            collect_kustomize_cleanup(&dir)
        } else {
            Vec::new()
        };

        Ok(StepResult {
            output: output.stdout,
            cleanup,
        })
    }
}

/// Minimal kustomization representation for collecting cleanup paths.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KustomizationFile {
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    helm_charts: Vec<HelmChartEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelmChartEntry {
    #[serde(default)]
    values_file: String,
}

/// Build artifacts that must not leak into the final output: the
/// kustomization file itself, the pulled charts, helm values files, and the
/// listed resources. Read failures downgrade to a warning; cleanup is
/// best-effort.
fn collect_kustomize_cleanup(dir: &Path) -> Vec<String> {
    let path = dir.join(KUSTOMIZATION_FILENAME);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "could not read kustomization.yaml for cleanup");
            return Vec::new();
        }
    };

    let kf: KustomizationFile = match serde_yaml::from_slice(&data) {
        Ok(kf) => kf,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "could not parse kustomization.yaml for cleanup");
            return Vec::new();
        }
    };

    let mut cleanup = vec![
        KUSTOMIZATION_FILENAME.to_string(),
        HELM_CHARTS_DIR.to_string(),
    ];
    for chart in &kf.helm_charts {
        if !chart.values_file.is_empty() {
            cleanup.push(chart.values_file.clone());
        }
    }
    cleanup.extend(kf.resources);
    cleanup
}
