//! Generate step: renders an inline template to a file under the work dir.

use crate::config::GenerateConfig;
use crate::context::render_str;
use crate::steps::{Step, StepContext, StepResult};
use anyhow::{Context, Result};
use std::fs;

pub struct GenerateStep {
    name: String,
    cfg: GenerateConfig,
}

impl GenerateStep {
    pub fn new(name: &str, cfg: GenerateConfig) -> Self {
        Self {
            name: name.to_string(),
            cfg,
        }
    }
}

impl Step for GenerateStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: StepContext) -> Result<StepResult> {
        let rendered =
            render_str(&self.cfg.template, ctx.template_data).context("rendering template")?;

        let out_path = ctx.work_dir.join(&self.cfg.output);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("creating parent directories")?;
        }
        fs::write(&out_path, rendered).context("writing output file")?;

        tracing::info!(step = %self.name, output = %self.cfg.output, "generate step wrote file");
        Ok(StepResult::default())
    }
}
