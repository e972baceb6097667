//! Shared helpers for driving the built binary against scratch Markdown trees.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A scratch workspace holding Markdown documents and a shell-toolchain config.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let workspace = Self { dir };
        workspace.write(
            "snipcheck.json",
            r#"{
  "schema_version": 1,
  "executable_languages": ["sh"],
  "output_languages": ["text", "yaml"],
  "timeout_seconds": 5,
  "workers": 2,
  "toolchains": {
    "sh": {"source_file": "snippet.sh", "run": "sh {source}"}
  }
}
"#,
        );
        workspace
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write fixture file");
        path
    }

    /// Run snipcheck with the workspace as working directory.
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_snipcheck"))
            .args(args)
            .current_dir(self.path())
            .env_remove("RUST_LOG")
            .output()
            .expect("run snipcheck")
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Skip shell-driven tests on hosts without `sh`.
pub fn skip_without_sh() -> bool {
    let missing = find_in_path("sh").is_none();
    if missing {
        eprintln!("Skipping: sh not available");
    }
    missing
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
