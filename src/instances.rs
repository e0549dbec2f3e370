//! Instance fan-out configuration.
//!
//! An instances file names independent invocations of the whole render
//! process, each with its own input subtree, output subtree, and context
//! layered over the global one.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::Mapping;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct InstancesConfig {
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub name: String,
    /// Input subdirectory relative to the input dir; empty uses the input
    /// dir itself.
    #[serde(default)]
    pub input: String,
    /// Output subdirectory relative to the output dir.
    #[serde(default)]
    pub output: String,
    /// Top-level directory names to copy; empty copies everything.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub context: Mapping,
}

/// Reads an instances YAML file and validates it.
pub fn load_instances(path: &Path) -> Result<InstancesConfig> {
    let data = fs::read(path)
        .with_context(|| format!("reading instances file {}", path.display()))?;

    let cfg: InstancesConfig = serde_yaml::from_slice(&data)
        .with_context(|| format!("parsing instances file {}", path.display()))?;

    cfg.validate()
        .with_context(|| format!("validating instances file {}", path.display()))?;

    Ok(cfg)
}

impl InstancesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.instances.is_empty() {
            bail!("instances list is empty");
        }

        let mut names: HashSet<&str> = HashSet::new();
        let mut outputs: HashSet<&str> = HashSet::new();

        for (index, inst) in self.instances.iter().enumerate() {
            if inst.name.is_empty() {
                bail!("instance {index}: name is required");
            }
            if inst.output.is_empty() {
                bail!("instance {:?}: output is required", inst.name);
            }
            if !names.insert(&inst.name) {
                bail!("instance {:?}: duplicate name", inst.name);
            }
            if !outputs.insert(&inst.output) {
                bail!(
                    "instance {:?}: duplicate output path {:?}",
                    inst.name,
                    inst.output
                );
            }
        }

        Ok(())
    }
}
