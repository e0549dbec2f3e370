//! End-to-end runs of the discovery and single-pipeline modes.

mod common;

use common::{assert_success, many_cmd, write_file};
use std::fs;

#[test]
fn discovery_run_renders_tree_and_strips_definitions() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    write_file(input.path(), "context.yaml", "org: acme\nenv: dev\n");
    write_file(
        input.path(),
        "app/deployment.yaml",
        "app: \"{{ org }}-{{ app }}\"\n",
    );
    write_file(
        input.path(),
        "app/.many.yaml",
        r#"
context:
  app: widget
  env: prod
pipeline:
  - name: render
    type: template
    template:
      files:
        include: ["deployment.yaml"]
  - name: banner
    type: generate
    generate:
      output: banner.txt
      template: "{{ org }} {{ app }} ({{ env }})"
"#,
    );

    let output_cmd = many_cmd()
        .arg("run")
        .arg("--input-dir")
        .arg(input.path())
        .arg("--output-dir")
        .arg(output.path())
        .arg("--context-file")
        .arg(input.path().join("context.yaml"))
        .output()
        .expect("running many");
    assert_success(&output_cmd);

    // Template step rendered in place; local context overrode the global env.
    assert_eq!(
        fs::read_to_string(output.path().join("app/deployment.yaml")).unwrap(),
        "app: \"acme-widget\"\n"
    );
    assert_eq!(
        fs::read_to_string(output.path().join("app/banner.txt")).unwrap(),
        "acme widget (prod)"
    );

    // Neither the definition nor the context file leaks into the output.
    assert!(!output.path().join("app/.many.yaml").exists());
    assert!(!output.path().join("context.yaml").exists());

    // The input tree is untouched.
    assert_eq!(
        fs::read_to_string(input.path().join("app/deployment.yaml")).unwrap(),
        "app: \"{{ org }}-{{ app }}\"\n"
    );
}

#[test]
fn single_mode_runs_only_the_named_pipeline() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let pipeline = "pipeline:\n  - name: gen\n    type: generate\n    generate:\n      output: out.txt\n      template: ran\n";
    write_file(input.path(), "one/.many.yaml", pipeline);
    write_file(input.path(), "two/.many.yaml", pipeline);

    let output_cmd = many_cmd()
        .arg("run")
        .arg("--input-dir")
        .arg(input.path())
        .arg("--output-dir")
        .arg(output.path())
        .arg("--pipeline")
        .arg(input.path().join("one/.many.yaml"))
        .output()
        .expect("running many");
    assert_success(&output_cmd);

    assert_eq!(
        fs::read_to_string(output.path().join("one/out.txt")).unwrap(),
        "ran"
    );
    assert!(!output.path().join("two/out.txt").exists());
    // Definitions are stripped from the whole output tree either way.
    assert!(!output.path().join("two/.many.yaml").exists());
}

#[test]
fn overwrite_recreates_the_output_directory() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_file(output.path(), "stale.txt", "old");
    write_file(
        input.path(),
        ".many.yaml",
        "pipeline:\n  - name: gen\n    type: generate\n    generate:\n      output: fresh.txt\n      template: new\n",
    );

    let output_cmd = many_cmd()
        .arg("run")
        .arg("--input-dir")
        .arg(input.path())
        .arg("--output-dir")
        .arg(output.path())
        .arg("--overwrite")
        .output()
        .expect("running many");
    assert_success(&output_cmd);

    assert!(!output.path().join("stale.txt").exists());
    assert_eq!(
        fs::read_to_string(output.path().join("fresh.txt")).unwrap(),
        "new"
    );
}

#[test]
fn failing_pipeline_is_reported_and_exits_nonzero() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_file(
        input.path(),
        "bad/.many.yaml",
        "pipeline:\n  - name: gen\n    type: generate\n    generate:\n      output: out.txt\n      template: \"{{ missing_fn() }}\"\n",
    );

    let output_cmd = many_cmd()
        .arg("run")
        .arg("--input-dir")
        .arg(input.path())
        .arg("--output-dir")
        .arg(output.path())
        .output()
        .expect("running many");

    assert!(!output_cmd.status.success());
    let stderr = String::from_utf8_lossy(&output_cmd.stderr);
    assert!(
        stderr.contains("pipeline(s) failed"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn missing_input_directory_is_an_error() {
    let output = tempfile::tempdir().unwrap();

    let output_cmd = many_cmd()
        .arg("run")
        .arg("--input-dir")
        .arg("/does/not/exist")
        .arg("--output-dir")
        .arg(output.path())
        .output()
        .expect("running many");

    assert!(!output_cmd.status.success());
    let stderr = String::from_utf8_lossy(&output_cmd.stderr);
    assert!(
        stderr.contains("input directory"),
        "unexpected stderr: {stderr}"
    );
}
