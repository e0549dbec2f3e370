//! `.many.yaml` pipeline definition: types, loading, and validation.
//!
//! A pipeline is an ordered list of named steps plus a local context,
//! associated with the directory its definition file lives in. Definitions
//! are parsed once and validated before any step runs; step type tags are a
//! closed enum, so an unknown `type:` is rejected at parse time.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::Mapping;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const SPLIT_BY_KIND: &str = "kind";
pub const SPLIT_BY_RESOURCE: &str = "resource";
pub const SPLIT_BY_GROUP: &str = "group";
pub const SPLIT_BY_KIND_DIR: &str = "kind-dir";
pub const SPLIT_BY_CUSTOM: &str = "custom";

const VALID_SPLIT_STRATEGIES: [&str; 5] = [
    SPLIT_BY_KIND,
    SPLIT_BY_RESOURCE,
    SPLIT_BY_GROUP,
    SPLIT_BY_KIND_DIR,
    SPLIT_BY_CUSTOM,
];

/// One parsed `.many.yaml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub context: Mapping,
    pub pipeline: Vec<StepConfig>,

    /// Directory containing the definition file. Set by the loader.
    #[serde(skip)]
    pub dir: PathBuf,
    /// Absolute path of the definition file. Set by the loader.
    #[serde(skip)]
    pub file_path: PathBuf,
}

/// A single step declaration: a unique name plus its typed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(flatten)]
    pub spec: StepSpec,
}

/// Closed set of step types, tagged by the `type:` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepSpec {
    Template { template: TemplateConfig },
    Kustomize { kustomize: KustomizeConfig },
    Helm { helm: HelmConfig },
    Split { split: SplitConfig },
    Generate { generate: GenerateConfig },
}

impl StepSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepSpec::Template { .. } => "template",
            StepSpec::Kustomize { .. } => "kustomize",
            StepSpec::Helm { .. } => "helm",
            StepSpec::Split { .. } => "split",
            StepSpec::Generate { .. } => "generate",
        }
    }

    /// Whether this step type registers byte output for later steps.
    pub fn produces_output(&self) -> bool {
        matches!(self, StepSpec::Kustomize { .. } | StepSpec::Helm { .. })
    }
}

/// Include/exclude glob patterns for the template step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub files: FileFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeConfig {
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub enable_helm: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmConfig {
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub release_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub values_files: Vec<String>,
    #[serde(default)]
    pub set: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateConfig {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub template: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitConfig {
    /// Name of the earlier kustomize/helm step whose output to split.
    #[serde(default)]
    pub input: String,
    /// Assignment strategy; empty selects grouping by kind.
    #[serde(default)]
    pub by: String,
    #[serde(default)]
    pub output_dir: String,
    /// Path template for the `custom` strategy, rendered per manifest.
    #[serde(default)]
    pub file_name_template: String,
    /// Reorder apiVersion/kind/metadata to the top of each document.
    /// Defaults to true.
    pub canonical_key_order: Option<bool>,
}

/// Reads a pipeline definition file, fixes `dir`/`file_path`, and validates.
pub fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let data = fs::read(path)
        .with_context(|| format!("reading pipeline file {}", path.display()))?;

    let mut pipeline: Pipeline = serde_yaml::from_slice(&data)
        .with_context(|| format!("parsing pipeline file {}", path.display()))?;

    let abs = path
        .canonicalize()
        .with_context(|| format!("resolving absolute path of {}", path.display()))?;
    pipeline.dir = abs
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    pipeline.file_path = abs;

    pipeline
        .validate()
        .with_context(|| format!("validating pipeline {}", path.display()))?;

    Ok(pipeline)
}

impl Pipeline {
    /// Checks the step list for configuration errors: empty/duplicate names,
    /// missing required fields, and split inputs that do not reference an
    /// earlier output-producing step.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.is_empty() {
            bail!("pipeline has no steps");
        }

        let mut names: HashMap<&str, usize> = HashMap::new();
        let mut output_producers: HashSet<&str> = HashSet::new();

        for (index, step) in self.pipeline.iter().enumerate() {
            if step.name.is_empty() {
                bail!("step {index}: name is required");
            }
            if let Some(prev) = names.insert(&step.name, index) {
                bail!(
                    "step {index}: duplicate step name {:?} (first defined at step {prev})",
                    step.name
                );
            }

            validate_step_spec(step, &output_producers)
                .with_context(|| format!("step {:?}", step.name))?;

            if step.spec.produces_output() {
                output_producers.insert(&step.name);
            }
        }

        Ok(())
    }
}

fn validate_step_spec(step: &StepConfig, output_producers: &HashSet<&str>) -> Result<()> {
    match &step.spec {
        StepSpec::Template { .. } | StepSpec::Kustomize { .. } => Ok(()),
        StepSpec::Helm { helm } => {
            if helm.chart.is_empty() {
                bail!("helm.chart is required");
            }
            if helm.release_name.is_empty() {
                bail!("helm.releaseName is required");
            }
            Ok(())
        }
        StepSpec::Generate { generate } => {
            if generate.output.is_empty() {
                bail!("generate.output is required");
            }
            if generate.template.is_empty() {
                bail!("generate.template is required");
            }
            Ok(())
        }
        StepSpec::Split { split } => {
            if split.input.is_empty() {
                bail!("split.input is required");
            }
            if !output_producers.contains(split.input.as_str()) {
                bail!(
                    "split.input {:?} does not reference an earlier kustomize or helm step",
                    split.input
                );
            }
            if !split.by.is_empty() && !VALID_SPLIT_STRATEGIES.contains(&split.by.as_str()) {
                bail!(
                    "split.by {:?} is not valid (valid: {})",
                    split.by,
                    VALID_SPLIT_STRATEGIES.join(", ")
                );
            }
            if split.by == SPLIT_BY_CUSTOM && split.file_name_template.is_empty() {
                bail!(
                    "split.fileNameTemplate is required when split.by is {:?}",
                    SPLIT_BY_CUSTOM
                );
            }
            Ok(())
        }
    }
}
