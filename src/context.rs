//! Context loading, merging, and template interpolation.
//!
//! A context is the key/value data handed to every template render in a
//! pipeline. Global and pipeline-local contexts combine with a shallow
//! top-level merge (local wins), then every string value anywhere in the
//! merged tree that contains a template marker is rendered against the
//! merged context itself.

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

/// Strings without this marker are passed through without parsing.
const TEMPLATE_MARKER: &str = "{{";

/// Reads a YAML file into a top-level mapping. An empty file yields an
/// empty context.
pub fn load_context_file(path: &Path) -> Result<Mapping> {
    let data = fs::read(path)
        .with_context(|| format!("reading context file {}", path.display()))?;
    let ctx: Option<Mapping> = serde_yaml::from_slice(&data)
        .with_context(|| format!("parsing context file {}", path.display()))?;
    Ok(ctx.unwrap_or_default())
}

/// Shallow merge of `local` over `global`. Keys present in both take the
/// local value; nested mappings are not merged.
pub fn merge_context(global: &Mapping, local: &Mapping) -> Mapping {
    let mut merged = global.clone();
    for (key, value) in local {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Single-pass interpolation of every string value in `ctx` against the
/// merged context itself, recursing through nested mappings and sequences.
/// Non-string values pass through untouched.
///
/// Each lookup reads a snapshot of the context taken before the pass, so a
/// template never observes another key's rendered value. (The behavior for
/// templates that reference other templated keys is deliberately "raw value
/// wins"; see DESIGN.md.)
pub fn interpolate_context(ctx: &mut Mapping) -> Result<()> {
    let root = Value::Mapping(ctx.clone());
    let env = Environment::new();
    for (key, value) in ctx.iter_mut() {
        interpolate_value(value, &root, &env)
            .with_context(|| format!("key {}", key_label(key)))?;
    }
    Ok(())
}

fn interpolate_value(value: &mut Value, root: &Value, env: &Environment) -> Result<()> {
    match value {
        Value::String(s) => {
            if s.contains(TEMPLATE_MARKER) {
                *s = env.render_str(s, root).context("rendering template")?;
            }
        }
        Value::Mapping(map) => {
            for (key, item) in map.iter_mut() {
                interpolate_value(item, root, env)
                    .with_context(|| format!("key {}", key_label(key)))?;
            }
        }
        Value::Sequence(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                interpolate_value(item, root, env)
                    .with_context(|| format!("index {index}"))?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Renders one template string against arbitrary serializable data. Shared
/// by the generate/template steps and custom split path templates.
pub(crate) fn render_str<S: Serialize>(source: &str, data: S) -> Result<String> {
    let env = Environment::new();
    let rendered = env.render_str(source, data)?;
    Ok(rendered)
}

fn key_label(key: &Value) -> String {
    match key.as_str() {
        Some(s) => format!("{s:?}"),
        None => format!("{key:?}"),
    }
}
