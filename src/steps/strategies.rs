//! Assignment strategies: pure functions partitioning manifests into
//! relative output paths.

use crate::config::{
    SplitConfig, SPLIT_BY_CUSTOM, SPLIT_BY_GROUP, SPLIT_BY_KIND, SPLIT_BY_KIND_DIR,
    SPLIT_BY_RESOURCE,
};
use crate::context::render_str;
use crate::steps::split::Manifest;
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use std::path::Path;

/// Output paths to the manifests assigned to them, in assignment order.
pub(crate) type Assignments = IndexMap<String, Vec<Manifest>>;

/// Closed set of assignment strategies, selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// One file per kind: `<kind>.yaml`.
    Kind,
    /// One file per manifest: `<kind>-<name>.yaml`.
    Resource,
    /// Directory per API group, file per resource.
    Group,
    /// Directory per pluralized kind, file named by resource name.
    KindDir,
    /// User-supplied path template rendered per manifest.
    Custom,
}

impl Strategy {
    /// Dispatch by configured name; empty selects grouping by kind.
    pub(crate) fn for_name(name: &str) -> Result<Strategy> {
        match name {
            SPLIT_BY_KIND | "" => Ok(Strategy::Kind),
            SPLIT_BY_RESOURCE => Ok(Strategy::Resource),
            SPLIT_BY_GROUP => Ok(Strategy::Group),
            SPLIT_BY_KIND_DIR => Ok(Strategy::KindDir),
            SPLIT_BY_CUSTOM => Ok(Strategy::Custom),
            other => bail!("unknown split strategy: {other}"),
        }
    }

    pub(crate) fn assign(self, manifests: &[Manifest], cfg: &SplitConfig) -> Result<Assignments> {
        let mut result = Assignments::new();
        for m in manifests {
            let path = match self {
                Strategy::Kind => format!("{}.yaml", m.kind.to_lowercase()),
                Strategy::Resource => {
                    let path = format!(
                        "{}-{}.yaml",
                        m.kind.to_lowercase(),
                        m.name.to_lowercase()
                    );
                    disambiguate(&result, path, m)
                }
                Strategy::Group => {
                    let path = format!(
                        "{}/{}-{}.yaml",
                        m.group.to_lowercase(),
                        m.kind.to_lowercase(),
                        m.name.to_lowercase()
                    );
                    disambiguate(&result, path, m)
                }
                Strategy::KindDir => {
                    let path = format!("{}/{}.yaml", pluralize(&m.kind), m.name.to_lowercase());
                    disambiguate(&result, path, m)
                }
                // Collisions are the template's responsibility here.
                Strategy::Custom => render_str(&cfg.file_name_template, &m.data)
                    .with_context(|| {
                        format!("executing fileNameTemplate for {}/{}", m.kind, m.name)
                    })?,
            };
            result.entry(path).or_default().push(m.clone());
        }
        Ok(result)
    }
}

/// Appends the namespace before the extension when a path would collide
/// with an existing entry and the manifest has a namespace to offer.
fn disambiguate(result: &Assignments, path: String, m: &Manifest) -> String {
    if !result.contains_key(&path) || m.namespace.is_empty() {
        return path;
    }
    let ext = Path::new(&path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = &path[..path.len() - ext.len()];
    format!("{stem}-{}{ext}", m.namespace.to_lowercase())
}

fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower == "ingress" {
        return "ingresses".to_string();
    }
    if lower.ends_with('s') {
        return format!("{lower}es");
    }
    if let Some(stem) = lower.strip_suffix('y') {
        return format!("{stem}ies");
    }
    format!("{lower}s")
}
