//! Shared test infrastructure for integration tests.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

/// Command for the compiled `many` binary.
pub fn many_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_many"))
}

/// Writes `content` at `rel` under `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("creating parent directories");
    }
    fs::write(&path, content).expect("writing test file");
}

/// Panics with the captured output if the command did not succeed.
pub fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed ({})\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}
