//! Pipeline steps: the unit of work a pipeline executes in order.
//!
//! Every step receives a working directory, the resolved template context,
//! and (for split) the byte output of an earlier step, and returns optional
//! byte output plus optional cleanup paths.

use crate::config::{StepConfig, StepSpec};
use anyhow::Result;
use serde_yaml::Mapping;
use std::path::Path;

mod generate;
mod helm;
mod kustomize;
mod split;
mod strategies;
mod template;

pub use generate::GenerateStep;
pub use helm::HelmStep;
pub use kustomize::KustomizeStep;
pub use split::SplitStep;
pub use template::TemplateStep;

/// Runtime context handed to a step.
pub struct StepContext<'a> {
    pub work_dir: &'a Path,
    pub template_data: &'a Mapping,
    /// Output from a prior step (used by split).
    pub input: Option<&'a [u8]>,
}

/// What a step produced.
#[derive(Debug, Default)]
pub struct StepResult {
    /// Multi-doc YAML stream (kustomize/helm).
    pub output: Vec<u8>,
    /// Paths relative to the work dir to remove after the step.
    pub cleanup: Vec<String>,
}

/// The contract every pipeline step implements.
pub trait Step {
    fn name(&self) -> &str;
    fn run(&self, ctx: StepContext) -> Result<StepResult>;
}

/// Builds the step implementation for a declaration. The step type set is
/// closed at parse time, so construction itself cannot fail.
pub fn new_step(cfg: &StepConfig) -> Box<dyn Step> {
    match &cfg.spec {
        StepSpec::Template { template } => {
            Box::new(TemplateStep::new(&cfg.name, template.clone()))
        }
        StepSpec::Kustomize { kustomize } => {
            Box::new(KustomizeStep::new(&cfg.name, kustomize.clone()))
        }
        StepSpec::Helm { helm } => Box::new(HelmStep::new(&cfg.name, helm.clone())),
        StepSpec::Split { split } => Box::new(SplitStep::new(&cfg.name, split.clone())),
        StepSpec::Generate { generate } => {
            Box::new(GenerateStep::new(&cfg.name, generate.clone()))
        }
    }
}
