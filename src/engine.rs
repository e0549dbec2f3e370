//! Pipeline execution: step sequencing, the step output registry, tree
//! copying, and the discovery/instances run modes.
//!
//! Each run mode copies the source tree into the output directory first and
//! processes it in place, so steps may freely mutate files. Within a run,
//! pipelines and instances fail independently; failures are aggregated into
//! one error at the end.

use crate::config::{Pipeline, StepConfig, StepSpec};
use crate::context::{interpolate_context, merge_context};
use crate::discover::{discover_pipelines, CONFIG_FILENAME};
use crate::instances::{Instance, InstancesConfig};
use crate::steps::{new_step, StepContext};
use anyhow::{anyhow, bail, Context, Result};
use serde_yaml::Mapping;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Executes a single pipeline's steps sequentially. A failing step aborts
/// the remaining steps of this pipeline.
pub fn run_pipeline(pipeline: &Pipeline, global_context: &Mapping) -> Result<()> {
    let mut ctx = merge_context(global_context, &pipeline.context);
    interpolate_context(&mut ctx).context("interpolating context")?;

    // Step name -> raw byte output, scoped to this run.
    let mut outputs: HashMap<String, Vec<u8>> = HashMap::new();

    for step_cfg in &pipeline.pipeline {
        info!(
            pipeline = %pipeline.file_path.display(),
            step = %step_cfg.name,
            step_type = step_cfg.spec.type_name(),
            "running step"
        );
        run_step(step_cfg, pipeline, &ctx, &mut outputs)?;
    }

    Ok(())
}

fn run_step(
    step_cfg: &StepConfig,
    pipeline: &Pipeline,
    ctx: &Mapping,
    outputs: &mut HashMap<String, Vec<u8>>,
) -> Result<()> {
    let step = new_step(step_cfg);

    let input = match &step_cfg.spec {
        StepSpec::Split { split } => Some(
            outputs
                .get(&split.input)
                .ok_or_else(|| {
                    anyhow!(
                        "step {:?}: input {:?} not found in step outputs",
                        step_cfg.name,
                        split.input
                    )
                })?
                .as_slice(),
        ),
        _ => None,
    };

    let sctx = StepContext {
        work_dir: &pipeline.dir,
        template_data: ctx,
        input,
    };

    let result = step
        .run(sctx)
        .with_context(|| format!("step {:?} failed", step.name()))?;

    if !result.output.is_empty() {
        outputs.insert(step_cfg.name.clone(), result.output);
    }
    remove_build_artifacts(&pipeline.dir, &result.cleanup);

    Ok(())
}

/// Best-effort removal of step artifacts. Failures are logged, never fatal.
fn remove_build_artifacts(dir: &Path, relative_paths: &[String]) {
    for rel in relative_paths {
        let path = dir.join(rel);
        info!(path = %path.display(), "cleaning up build artifact");
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(err) = result {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to remove build artifact");
            }
        }
    }
}

/// Discovery mode: copies the source tree to `output_dir`, discovers and
/// executes every pipeline, and aggregates failures.
pub fn run_all(
    input_dir: &Path,
    output_dir: &Path,
    global_context: &Mapping,
    max_depth: i32,
    context_file: Option<&Path>,
) -> Result<()> {
    copy_tree(input_dir, output_dir).context("copying source tree")?;
    remove_context_file(context_file, input_dir, output_dir);

    let pipelines = discover_pipelines(output_dir, max_depth).context("discovering pipelines")?;

    if pipelines.is_empty() {
        warn!(dir = %input_dir.display(), "no .many.yaml files found");
        return Ok(());
    }

    info!(count = pipelines.len(), "discovered pipelines");

    let mut failed: Vec<String> = Vec::new();
    for pipeline in &pipelines {
        info!(path = %pipeline.file_path.display(), "executing pipeline");
        match run_pipeline(pipeline, global_context) {
            Ok(()) => info!(path = %pipeline.file_path.display(), "pipeline succeeded"),
            Err(err) => {
                error!(path = %pipeline.file_path.display(), error = format!("{err:#}"), "pipeline failed");
                failed.push(pipeline.file_path.display().to_string());
            }
        }
    }

    if let Err(err) = remove_config_files(output_dir) {
        error!(error = %err, "failed to clean up .many.yaml files");
    }

    if !failed.is_empty() {
        bail!("{} pipeline(s) failed: {}", failed.len(), failed.join(", "));
    }

    Ok(())
}

/// Single mode: copies the source tree and runs one specific pipeline.
/// `pipeline_file` must be a path within `input_dir`.
pub fn run_single(
    pipeline_file: &Path,
    input_dir: &Path,
    output_dir: &Path,
    global_context: &Mapping,
    context_file: Option<&Path>,
) -> Result<()> {
    copy_tree(input_dir, output_dir).context("copying source tree")?;
    remove_context_file(context_file, input_dir, output_dir);

    let rel = relative_to_input(pipeline_file, input_dir).ok_or_else(|| {
        anyhow!(
            "pipeline file {} is not within input directory {}",
            pipeline_file.display(),
            input_dir.display()
        )
    })?;

    let output_pipeline_file = output_dir.join(rel);
    let pipeline =
        crate::config::load_pipeline(&output_pipeline_file).context("loading pipeline")?;

    info!(path = %pipeline.file_path.display(), "executing single pipeline");
    run_pipeline(&pipeline, global_context).context("pipeline failed")?;

    if let Err(err) = remove_config_files(output_dir) {
        error!(error = %err, "failed to clean up .many.yaml files");
    }

    Ok(())
}

/// Instances mode: per instance, filtered copy into an isolated output
/// subtree, discovery, and execution with the instance context merged over
/// the global one. One instance's failure does not abort its siblings.
pub fn run_instances(
    cfg: &InstancesConfig,
    input_dir: &Path,
    output_dir: &Path,
    global_context: &Mapping,
    max_depth: i32,
    context_file: Option<&Path>,
) -> Result<()> {
    let mut failed: Vec<String> = Vec::new();

    for inst in &cfg.instances {
        info!(name = %inst.name, "processing instance");
        if let Err(err) = run_instance(
            inst,
            input_dir,
            output_dir,
            global_context,
            max_depth,
            context_file,
        ) {
            error!(name = %inst.name, error = format!("{err:#}"), "instance failed");
            failed.push(inst.name.clone());
        }
    }

    if !failed.is_empty() {
        bail!("{} instance(s) failed: {}", failed.len(), failed.join(", "));
    }

    Ok(())
}

fn run_instance(
    inst: &Instance,
    input_dir: &Path,
    output_dir: &Path,
    global_context: &Mapping,
    max_depth: i32,
    context_file: Option<&Path>,
) -> Result<()> {
    let inst_input_dir = if inst.input.is_empty() {
        input_dir.to_path_buf()
    } else {
        input_dir.join(&inst.input)
    };
    let inst_output_dir = output_dir.join(&inst.output);
    let inst_context = merge_context(global_context, &inst.context);

    copy_tree_filtered(&inst_input_dir, &inst_output_dir, &inst.include)
        .context("copying tree")?;
    remove_context_file(context_file, &inst_input_dir, &inst_output_dir);

    let pipelines =
        discover_pipelines(&inst_output_dir, max_depth).context("discovering pipelines")?;

    if pipelines.is_empty() {
        warn!(name = %inst.name, "no .many.yaml files found for instance");
    }

    info!(name = %inst.name, count = pipelines.len(), "discovered pipelines for instance");

    let mut pipeline_failed = false;
    for pipeline in &pipelines {
        info!(instance = %inst.name, path = %pipeline.file_path.display(), "executing pipeline");
        if let Err(err) = run_pipeline(pipeline, &inst_context) {
            error!(
                instance = %inst.name,
                path = %pipeline.file_path.display(),
                error = format!("{err:#}"),
                "pipeline failed"
            );
            pipeline_failed = true;
        }
    }

    if let Err(err) = remove_config_files(&inst_output_dir) {
        error!(instance = %inst.name, error = %err, "failed to clean up .many.yaml files");
    }

    if pipeline_failed {
        bail!("one or more pipelines failed");
    }
    Ok(())
}

/// Copies `src` into `dst`, creating directories as needed. File
/// permissions are preserved by `fs::copy`.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.context("walking source tree")?;
        copy_entry(src, dst, &entry)?;
    }
    Ok(())
}

/// Like `copy_tree`, but only descends into the named immediate
/// subdirectories of `src`. An empty include list copies everything.
fn copy_tree_filtered(src: &Path, dst: &Path, include: &[String]) -> Result<()> {
    if include.is_empty() {
        return copy_tree(src, dst);
    }

    let mut walker = WalkDir::new(src).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.context("walking source tree")?;
        if entry.depth() == 1
            && entry.file_type().is_dir()
            && !include.iter().any(|name| entry.file_name() == name.as_str())
        {
            walker.skip_current_dir();
            continue;
        }
        copy_entry(src, dst, &entry)?;
    }
    Ok(())
}

fn copy_entry(src: &Path, dst: &Path, entry: &walkdir::DirEntry) -> Result<()> {
    let rel = entry
        .path()
        .strip_prefix(src)
        .with_context(|| format!("computing relative path for {}", entry.path().display()))?;
    let target = dst.join(rel);

    if entry.file_type().is_dir() {
        fs::create_dir_all(&target)
            .with_context(|| format!("creating directory {}", target.display()))?;
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        fs::copy(entry.path(), &target)
            .with_context(|| format!("copying {}", entry.path().display()))?;
    }
    Ok(())
}

/// Drops the copied global context file from the output tree, if it was
/// inside the input tree. Best-effort.
fn remove_context_file(context_file: Option<&Path>, input_dir: &Path, output_dir: &Path) {
    let Some(context_file) = context_file else {
        return;
    };
    let Some(rel) = relative_to_input(context_file, input_dir) else {
        return;
    };
    let target = output_dir.join(rel);
    match fs::remove_file(&target) {
        Ok(()) => debug!(path = %target.display(), "removed context file from output"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %target.display(), error = %err, "failed to remove context file from output");
        }
    }
}

fn relative_to_input(file: &Path, input_dir: &Path) -> Option<PathBuf> {
    let abs_file = file.canonicalize().ok()?;
    let abs_input = input_dir.canonicalize().ok()?;
    abs_file
        .strip_prefix(&abs_input)
        .ok()
        .map(Path::to_path_buf)
}

/// Removes every `.many.yaml` under `root` so definitions never leak into
/// the rendered output.
fn remove_config_files(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.context("walking output tree")?;
        if !entry.file_type().is_dir() && entry.file_name() == CONFIG_FILENAME {
            debug!(path = %entry.path().display(), "removing config file from output");
            fs::remove_file(entry.path())
                .with_context(|| format!("removing {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenerateConfig, SplitConfig};
    use serde_yaml::Value;

    fn mapping(pairs: &[(&str, &str)]) -> Mapping {
        pairs
            .iter()
            .map(|(k, v)| {
                (
                    Value::String((*k).to_string()),
                    Value::String((*v).to_string()),
                )
            })
            .collect()
    }

    fn generate_step(name: &str, output: &str, template: &str) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            spec: StepSpec::Generate {
                generate: GenerateConfig {
                    output: output.to_string(),
                    template: template.to_string(),
                },
            },
        }
    }

    #[test]
    fn pipeline_renders_with_merged_interpolated_context() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline {
            context: mapping(&[("env", "prod"), ("target", "{{ region }}-{{ env }}")]),
            pipeline: vec![generate_step("gen", "out.txt", "deploy to {{ target }}")],
            dir: dir.path().to_path_buf(),
            file_path: dir.path().join(CONFIG_FILENAME),
        };
        let global = mapping(&[("region", "eu"), ("env", "dev")]);

        run_pipeline(&pipeline, &global).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "deploy to eu-prod"
        );
    }

    #[test]
    fn missing_registry_entry_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline {
            context: Mapping::new(),
            pipeline: vec![StepConfig {
                name: "split".to_string(),
                spec: StepSpec::Split {
                    split: SplitConfig {
                        input: "build".to_string(),
                        ..SplitConfig::default()
                    },
                },
            }],
            dir: dir.path().to_path_buf(),
            file_path: dir.path().join(CONFIG_FILENAME),
        };

        let err = run_pipeline(&pipeline, &Mapping::new()).unwrap_err();
        assert!(format!("{err:#}").contains("input \"build\" not found"));
    }

    #[test]
    fn step_failure_aborts_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline {
            context: Mapping::new(),
            pipeline: vec![
                generate_step("bad", "a.txt", "{{ missing_fn() }}"),
                generate_step("after", "b.txt", "never"),
            ],
            dir: dir.path().to_path_buf(),
            file_path: dir.path().join(CONFIG_FILENAME),
        };

        let err = run_pipeline(&pipeline, &Mapping::new()).unwrap_err();
        assert!(format!("{err:#}").contains("step \"bad\" failed"));
        assert!(!dir.path().join("b.txt").exists());
    }

    #[test]
    fn interpolation_failure_aborts_before_any_step() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline {
            context: mapping(&[("broken", "{{ nope(")]),
            pipeline: vec![generate_step("gen", "out.txt", "x")],
            dir: dir.path().to_path_buf(),
            file_path: dir.path().join(CONFIG_FILENAME),
        };

        let err = run_pipeline(&pipeline, &Mapping::new()).unwrap_err();
        assert!(format!("{err:#}").contains("interpolating context"));
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn build_artifact_removal_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("artifact.yaml"), "x").unwrap();
        fs::create_dir(dir.path().join("charts")).unwrap();

        remove_build_artifacts(
            dir.path(),
            &[
                "artifact.yaml".to_string(),
                "charts".to_string(),
                "does-not-exist".to_string(),
            ],
        );

        assert!(!dir.path().join("artifact.yaml").exists());
        assert!(!dir.path().join("charts").exists());
    }

    #[test]
    fn run_all_copies_renders_and_strips_config_files() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::create_dir(input.path().join("app")).unwrap();
        fs::write(input.path().join("app/static.txt"), "keep me").unwrap();
        fs::write(
            input.path().join("app/.many.yaml"),
            "context:\n  app: widget\npipeline:\n  - name: gen\n    type: generate\n    generate:\n      output: generated.txt\n      template: \"app={{ app }}\"\n",
        )
        .unwrap();

        run_all(input.path(), output.path(), &Mapping::new(), -1, None).unwrap();

        assert_eq!(
            fs::read_to_string(output.path().join("app/static.txt")).unwrap(),
            "keep me"
        );
        assert_eq!(
            fs::read_to_string(output.path().join("app/generated.txt")).unwrap(),
            "app=widget"
        );
        assert!(!output.path().join("app/.many.yaml").exists());
        // Input tree untouched.
        assert!(input.path().join("app/.many.yaml").exists());
    }

    #[test]
    fn run_all_aggregates_failures_and_keeps_going() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::create_dir(input.path().join("bad")).unwrap();
        fs::create_dir(input.path().join("good")).unwrap();
        fs::write(
            input.path().join("bad/.many.yaml"),
            "pipeline:\n  - name: gen\n    type: generate\n    generate:\n      output: out.txt\n      template: \"{{ missing_fn() }}\"\n",
        )
        .unwrap();
        fs::write(
            input.path().join("good/.many.yaml"),
            "pipeline:\n  - name: gen\n    type: generate\n    generate:\n      output: out.txt\n      template: fine\n",
        )
        .unwrap();

        let err = run_all(input.path(), output.path(), &Mapping::new(), -1, None).unwrap_err();

        assert!(err.to_string().contains("1 pipeline(s) failed"));
        assert!(err.to_string().contains("bad"));
        assert_eq!(
            fs::read_to_string(output.path().join("good/out.txt")).unwrap(),
            "fine"
        );
    }

    #[test]
    fn run_single_rejects_files_outside_input() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let stray = elsewhere.path().join(CONFIG_FILENAME);
        fs::write(&stray, "pipeline: []\n").unwrap();

        let err = run_single(&stray, input.path(), output.path(), &Mapping::new(), None)
            .unwrap_err();
        assert!(err.to_string().contains("not within input directory"));
    }

    #[test]
    fn context_file_inside_input_is_dropped_from_output() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let context_path = input.path().join("context.yaml");
        fs::write(&context_path, "env: prod\n").unwrap();

        run_all(
            input.path(),
            output.path(),
            &Mapping::new(),
            -1,
            Some(&context_path),
        )
        .unwrap();

        assert!(!output.path().join("context.yaml").exists());
    }

    #[test]
    fn instance_failure_does_not_abort_siblings() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::create_dir(input.path().join("base")).unwrap();
        fs::write(
            input.path().join("base/.many.yaml"),
            "pipeline:\n  - name: gen\n    type: generate\n    generate:\n      output: out.txt\n      template: \"region={{ region }}\"\n",
        )
        .unwrap();

        let cfg = InstancesConfig {
            instances: vec![
                Instance {
                    name: "broken".to_string(),
                    input: String::new(),
                    output: "out-broken".to_string(),
                    include: vec![],
                    // Interpolation of this context fails, aborting the
                    // instance's pipeline before any step runs.
                    context: mapping(&[("region", "eu"), ("bad", "{{ nope(")]),
                },
                Instance {
                    name: "healthy".to_string(),
                    input: String::new(),
                    output: "out-healthy".to_string(),
                    include: vec![],
                    context: mapping(&[("region", "us")]),
                },
            ],
        };

        let err = run_instances(
            &cfg,
            input.path(),
            output.path(),
            &Mapping::new(),
            -1,
            None,
        )
        .unwrap_err();

        assert!(err.to_string().contains("1 instance(s) failed: broken"));
        assert_eq!(
            fs::read_to_string(output.path().join("out-healthy/base/out.txt")).unwrap(),
            "region=us"
        );
        assert!(!output.path().join("out-broken/base/out.txt").exists());
    }

    #[test]
    fn filtered_copy_keeps_only_included_top_level_dirs() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("base")).unwrap();
        fs::create_dir(src.path().join("extra")).unwrap();
        fs::write(src.path().join("base/a.txt"), "a").unwrap();
        fs::write(src.path().join("extra/b.txt"), "b").unwrap();
        fs::write(src.path().join("root.txt"), "r").unwrap();

        copy_tree_filtered(src.path(), dst.path(), &["base".to_string()]).unwrap();

        assert!(dst.path().join("base/a.txt").is_file());
        assert!(dst.path().join("root.txt").is_file());
        assert!(!dst.path().join("extra").exists());
    }
}
