//! Split step: partitions a multi-document YAML stream into files.
//!
//! The input is the registered output of an earlier kustomize/helm step.
//! Documents are decoded, their top-level keys canonicalized (apiVersion,
//! kind, metadata first), assigned to relative paths by a strategy, and
//! written out along with a kustomization index listing every produced
//! path.

use crate::config::SplitConfig;
use crate::steps::strategies::{Assignments, Strategy};
use crate::steps::{Step, StepContext, StepResult};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::Value;
use std::fs;
use std::path::Path;

/// One parsed manifest document.
#[derive(Debug, Clone)]
pub(crate) struct Manifest {
    pub(crate) api_version: String,
    pub(crate) kind: String,
    pub(crate) name: String,
    pub(crate) namespace: String,
    /// API group derived from `api_version`.
    pub(crate) group: String,
    /// Canonical serialized form, written verbatim to output files.
    pub(crate) raw: String,
    /// Full decoded field tree, consulted by custom path templates.
    pub(crate) data: Value,
}

pub struct SplitStep {
    name: String,
    cfg: SplitConfig,
}

impl SplitStep {
    pub fn new(name: &str, cfg: SplitConfig) -> Self {
        Self {
            name: name.to_string(),
            cfg,
        }
    }
}

impl Step for SplitStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: StepContext) -> Result<StepResult> {
        let input = ctx.input.unwrap_or_default();
        if input.is_empty() {
            bail!("no input data provided");
        }

        let canonical_order = self.cfg.canonical_key_order.unwrap_or(true);
        let manifests =
            parse_multi_doc_yaml(input, canonical_order).context("parsing multi-doc YAML")?;

        tracing::info!(
            step = %self.name,
            manifests = manifests.len(),
            strategy = %self.cfg.by,
            "split step"
        );

        let strategy = Strategy::for_name(&self.cfg.by)?;
        let assignments = strategy
            .assign(&manifests, &self.cfg)
            .context("assigning manifests")?;

        let output_dir_rel = if self.cfg.output_dir.is_empty() {
            "."
        } else {
            self.cfg.output_dir.as_str()
        };
        let output_dir = ctx.work_dir.join(output_dir_rel);

        write_assignments(&output_dir, &assignments)?;
        write_kustomization(ctx.work_dir, output_dir_rel, &assignments)?;

        Ok(StepResult::default())
    }
}

fn write_assignments(output_dir: &Path, assignments: &Assignments) -> Result<()> {
    for (rel_path, docs) in assignments {
        let abs = output_dir.join(rel_path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory for {rel_path}"))?;
        }

        let data = marshal_docs(docs);
        fs::write(&abs, data).with_context(|| format!("writing {rel_path}"))?;
        tracing::debug!(path = %rel_path, manifests = docs.len(), "split wrote file");
    }
    Ok(())
}

/// Concatenates manifests with `---` separators, guaranteeing a trailing
/// newline.
fn marshal_docs(docs: &[Manifest]) -> String {
    let mut buf = String::new();
    for (index, m) in docs.iter().enumerate() {
        if index > 0 {
            buf.push_str("---\n");
        }
        buf.push_str(&m.raw);
        if !m.raw.ends_with('\n') {
            buf.push('\n');
        }
    }
    buf
}

/// Writes a kustomization index at the work dir listing every produced
/// relative path, sorted lexicographically.
fn write_kustomization(work_dir: &Path, output_dir_rel: &str, assignments: &Assignments) -> Result<()> {
    let mut paths: Vec<String> = assignments
        .keys()
        .map(|rel| {
            if output_dir_rel == "." {
                rel.clone()
            } else {
                format!("{output_dir_rel}/{rel}")
            }
        })
        .collect();
    paths.sort();

    let mut buf =
        String::from("apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources:\n");
    for path in &paths {
        buf.push_str("  - ");
        buf.push_str(path);
        buf.push('\n');
    }

    let kustomization_path = work_dir.join("kustomization.yaml");
    fs::write(&kustomization_path, buf).context("writing kustomization.yaml")?;
    tracing::debug!(
        path = %kustomization_path.display(),
        resources = paths.len(),
        "split wrote kustomization.yaml"
    );
    Ok(())
}

pub(crate) fn parse_multi_doc_yaml(data: &[u8], canonical_order: bool) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(data) {
        let mut value = Value::deserialize(document).context("decoding YAML document")?;
        // Stray separators and explicit-null documents are not manifests.
        if value.is_null() {
            continue;
        }
        if canonical_order {
            reorder_mapping_keys(&mut value);
        }
        manifests.push(build_manifest(value)?);
    }
    Ok(manifests)
}

/// Canonical top-of-manifest key order for Kubernetes resources.
fn priority_rank(key: &Value) -> usize {
    match key.as_str() {
        Some("apiVersion") => 0,
        Some("kind") => 1,
        Some("metadata") => 2,
        _ => 3,
    }
}

/// Reorders top-level mapping keys so apiVersion, kind, and metadata come
/// first (in that order), with remaining keys in their original order.
fn reorder_mapping_keys(value: &mut Value) {
    let Value::Mapping(map) = value else {
        return;
    };
    let mut entries: Vec<(Value, Value)> = std::mem::take(map).into_iter().collect();
    // Stable, so non-priority keys keep their relative order.
    entries.sort_by_key(|(key, _)| priority_rank(key));
    *map = entries.into_iter().collect();
}

fn build_manifest(value: Value) -> Result<Manifest> {
    let raw = serde_yaml::to_string(&value).context("re-serializing document")?;

    let api_version = str_field(&value, "apiVersion");
    let kind = str_field(&value, "kind");
    let metadata = value.get("metadata");
    let name = metadata.map(|m| str_field(m, "name")).unwrap_or_default();
    let namespace = metadata
        .map(|m| str_field(m, "namespace"))
        .unwrap_or_default();
    let group = extract_group(&api_version);

    Ok(Manifest {
        api_version,
        kind,
        name,
        namespace,
        group,
        raw,
        data: value,
    })
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Extracts the API group from an apiVersion string.
/// "apps/v1" -> "apps", "v1" -> "core", "" -> "".
pub(crate) fn extract_group(api_version: &str) -> String {
    if api_version.is_empty() {
        return String::new();
    }
    match api_version.split_once('/') {
        Some((group, _)) => group.to_string(),
        None => "core".to_string(),
    }
}
