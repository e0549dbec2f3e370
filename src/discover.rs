//! Discovery of `.many.yaml` pipeline definitions in a directory tree.

use crate::config::{load_pipeline, Pipeline};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const CONFIG_FILENAME: &str = ".many.yaml";

/// Walks `root` looking for `.many.yaml` files up to `max_depth`.
/// A depth of -1 means unlimited; 0 means only root itself.
/// Results are sorted by path depth, so parents come before children.
pub fn discover_pipelines(root: &Path, max_depth: i32) -> Result<Vec<Pipeline>> {
    let abs_root = root
        .canonicalize()
        .with_context(|| format!("resolving root path {}", root.display()))?;

    let mut paths = collect_config_paths(&abs_root, max_depth)?;
    paths.sort_by_key(|p| path_depth(p, &abs_root));

    paths
        .iter()
        .map(|p| load_pipeline(p).with_context(|| format!("loading {}", p.display())))
        .collect()
}

fn collect_config_paths(abs_root: &Path, max_depth: i32) -> Result<Vec<PathBuf>> {
    let mut walker = WalkDir::new(abs_root);
    if max_depth >= 0 {
        // A config at depth N lives in a directory at depth N-1, so allow
        // one extra level for the file itself.
        walker = walker.max_depth(max_depth as usize + 1);
    }

    let mut paths = Vec::new();
    for entry in walker {
        let entry = entry.context("walking directory tree")?;
        if !entry.file_type().is_dir() && entry.file_name() == CONFIG_FILENAME {
            paths.push(entry.path().to_path_buf());
        }
    }
    Ok(paths)
}

fn path_depth(path: &Path, root: &Path) -> usize {
    path.strip_prefix(root)
        .map(|rel| rel.components().count())
        .unwrap_or_else(|_| path.components().count())
}
