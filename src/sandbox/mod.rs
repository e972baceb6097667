//! Isolated execution of one snippet.
//!
//! Every invocation gets a private temp directory; the source is written there,
//! the toolchain's compile and run steps execute inside it under one shared
//! deadline, and the directory is removed when the scope guard drops.
pub mod process;
pub mod toolchain;

use crate::pairing::{Snippet, SnippetRef};
use crate::util::error_chain_message;
use anyhow::{anyhow, Context, Result};
use process::{run_step, StepOutcome, StepOutput, StepRequest};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolchain::{TemplateVars, ToolchainSpec};

const SCOPE_PREFIX: &str = "snipcheck-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    TimedOut,
    CompileFailed,
    CrashedRuntime,
}

impl ExecutionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::TimedOut => "timed-out",
            ExecutionStatus::CompileFailed => "compile-failed",
            ExecutionStatus::CrashedRuntime => "crashed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub snippet: SnippetRef,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    /// A result for a snippet whose sandbox could not be set up or run.
    pub fn crashed(snippet: SnippetRef, detail: String, duration_ms: u64) -> Self {
        Self {
            snippet,
            stdout: String::new(),
            stderr: detail,
            exit_code: None,
            signal: None,
            duration_ms,
            status: ExecutionStatus::CrashedRuntime,
        }
    }
}

/// Shared run-wide interrupt flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub env_passthrough: Vec<String>,
}

/// Compile and run one snippet. Never fails: setup problems become a
/// `CrashedRuntime` result carrying the error chain.
pub fn execute(
    snippet: &Snippet,
    toolchain: &ToolchainSpec,
    options: &SandboxOptions,
    cancel: &CancelToken,
) -> ExecutionResult {
    let start = Instant::now();
    tracing::debug!(
        document = %snippet.document,
        line = snippet.block.line,
        language = %snippet.block.language,
        "snippet start"
    );
    let result = match execute_in_scope(snippet, toolchain, options, cancel, start) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(
                document = %snippet.document,
                line = snippet.block.line,
                error = %error_chain_message(&err),
                "sandbox setup failed"
            );
            ExecutionResult::crashed(
                SnippetRef::from(snippet),
                format!("sandbox setup failed: {}", error_chain_message(&err)),
                elapsed_ms(start),
            )
        }
    };
    tracing::debug!(
        document = %snippet.document,
        line = snippet.block.line,
        status = result.status.label(),
        duration_ms = result.duration_ms,
        "snippet finished"
    );
    result
}

fn execute_in_scope(
    snippet: &Snippet,
    toolchain: &ToolchainSpec,
    options: &SandboxOptions,
    cancel: &CancelToken,
    start: Instant,
) -> Result<ExecutionResult> {
    let scope = tempfile::Builder::new()
        .prefix(SCOPE_PREFIX)
        .tempdir()
        .context("create sandbox scope")?;
    let prepared = toolchain.prepare_source(&snippet.block.body);
    let source_path = scope.path().join(&prepared.file_name);
    fs::write(&source_path, &prepared.text)
        .with_context(|| format!("write {}", source_path.display()))?;

    let vars = TemplateVars {
        source: &source_path,
        dir: scope.path(),
        stem: &prepared.stem,
    };
    let env = scope_env(scope.path(), &options.env_passthrough);
    let deadline = start
        .checked_add(options.timeout)
        .ok_or_else(|| anyhow!("timeout {:?} is out of range", options.timeout))?;
    let step = |argv: &[String]| -> Result<StepOutput> {
        run_step(
            &StepRequest {
                argv,
                cwd: scope.path(),
                env: &env,
                deadline,
                max_output_bytes: options.max_output_bytes,
            },
            cancel,
        )
    };

    let finish = |output: StepOutput, status: ExecutionStatus| {
        let (exit_code, signal) = match output.outcome {
            StepOutcome::Exited { code, signal } => (code, signal),
            StepOutcome::TimedOut | StepOutcome::Interrupted => (None, None),
        };
        let mut stderr = output.stderr;
        match output.outcome {
            StepOutcome::TimedOut => append_note(
                &mut stderr,
                &format!("timed out after {:.1}s", options.timeout.as_secs_f64()),
            ),
            StepOutcome::Interrupted => append_note(&mut stderr, "interrupted"),
            StepOutcome::Exited { .. } => {}
        }
        ExecutionResult {
            snippet: SnippetRef::from(snippet),
            stdout: output.stdout,
            stderr,
            exit_code,
            signal,
            duration_ms: elapsed_ms(start),
            status,
        }
    };

    if let Some(argv) = toolchain.compile_argv(&vars)? {
        let output = step(&argv)?;
        match output.outcome {
            outcome if outcome.success() => {}
            StepOutcome::TimedOut => return Ok(finish(output, ExecutionStatus::TimedOut)),
            StepOutcome::Interrupted => {
                return Ok(finish(output, ExecutionStatus::CrashedRuntime))
            }
            StepOutcome::Exited { .. } => {
                return Ok(finish(output, ExecutionStatus::CompileFailed))
            }
        }
    }

    let output = step(&toolchain.run_argv(&vars)?)?;
    let status = match output.outcome {
        outcome if outcome.success() => ExecutionStatus::Completed,
        StepOutcome::TimedOut => ExecutionStatus::TimedOut,
        StepOutcome::Interrupted | StepOutcome::Exited { .. } => ExecutionStatus::CrashedRuntime,
    };
    let result = finish(output, status);

    let scope_path = scope.path().to_path_buf();
    if let Err(err) = scope.close() {
        tracing::warn!(path = %scope_path.display(), %err, "failed to remove sandbox scope");
    }
    Ok(result)
}

fn scope_env(scope: &Path, passthrough: &[String]) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = passthrough
        .iter()
        .filter(|key| key.as_str() != "HOME" && key.as_str() != "TMPDIR")
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
        .collect();
    let scope = scope.to_string_lossy().into_owned();
    env.push(("HOME".to_string(), scope.clone()));
    env.push(("TMPDIR".to_string(), scope));
    env
}

fn append_note(stderr: &mut String, note: &str) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str("[snipcheck] ");
    stderr.push_str(note);
    stderr.push('\n');
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::extract::CodeBlock;
    use toolchain::SourcePrep;

    fn sh_toolchain() -> ToolchainSpec {
        ToolchainSpec {
            source_file: "snippet.sh".to_string(),
            compile: None,
            run: "sh {source}".to_string(),
            prepare: SourcePrep::Verbatim,
        }
    }

    fn compiled_toolchain() -> ToolchainSpec {
        ToolchainSpec {
            source_file: "snippet.sh".to_string(),
            compile: Some("sh -n {source}".to_string()),
            run: "sh {source}".to_string(),
            prepare: SourcePrep::Verbatim,
        }
    }

    fn options(timeout: Duration) -> SandboxOptions {
        SandboxOptions {
            timeout,
            max_output_bytes: 4096,
            env_passthrough: vec!["PATH".to_string()],
        }
    }

    fn snippet(body: &str) -> Snippet {
        Snippet {
            document: "shell.md".to_string(),
            ordinal: 0,
            block: CodeBlock {
                document: "shell.md".to_string(),
                index: 0,
                language: "sh".to_string(),
                info: "sh".to_string(),
                body: body.to_string(),
                span: 0..0,
                line: 1,
                skip: false,
            },
            expected: None,
        }
    }

    fn run(body: &str, toolchain: &ToolchainSpec, timeout: Duration) -> ExecutionResult {
        execute(
            &snippet(body),
            toolchain,
            &options(timeout),
            &CancelToken::default(),
        )
    }

    #[test]
    fn completed_snippet_captures_stdout() {
        let result = run("echo Hello\n", &sh_toolchain(), Duration::from_secs(10));
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.stdout, "Hello\n");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.snippet.document, "shell.md");
    }

    #[test]
    fn infinite_loop_times_out() {
        let result = run("while :; do :; done\n", &sh_toolchain(), Duration::from_secs(1));
        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert!(result.stderr.contains("timed out"));
        assert_eq!(result.exit_code, None);
    }

    #[test]
    fn nonzero_exit_is_a_runtime_crash() {
        let result = run("echo boom >&2; exit 4\n", &sh_toolchain(), Duration::from_secs(10));
        assert_eq!(result.status, ExecutionStatus::CrashedRuntime);
        assert_eq!(result.exit_code, Some(4));
        assert_eq!(result.stderr, "boom\n");
    }

    #[test]
    fn failing_compile_step_is_compile_failed() {
        let result = run("if then fi (\n", &compiled_toolchain(), Duration::from_secs(10));
        assert_eq!(result.status, ExecutionStatus::CompileFailed);
        assert!(!result.stderr.is_empty());
    }

    #[test]
    fn compile_then_run_succeeds() {
        let result = run("echo compiled\n", &compiled_toolchain(), Duration::from_secs(10));
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.stdout, "compiled\n");
    }

    #[test]
    fn scopes_are_private_and_removed() {
        let first = run("pwd\ntouch leftover\n", &sh_toolchain(), Duration::from_secs(10));
        let second = run("pwd\nls\n", &sh_toolchain(), Duration::from_secs(10));
        let first_dir = first.stdout.lines().next().unwrap().to_string();
        let second_lines: Vec<_> = second.stdout.lines().collect();
        assert_ne!(first_dir, second_lines[0]);
        assert_eq!(&second_lines[1..], ["snippet.sh"]);
        assert!(!Path::new(&first_dir).exists());
    }

    #[test]
    fn home_points_into_the_scope() {
        let result = run("echo \"$HOME\"\npwd\n", &sh_toolchain(), Duration::from_secs(10));
        let lines: Vec<_> = result.stdout.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(SCOPE_PREFIX));
    }

    #[test]
    fn interrupt_kills_running_snippet_and_removes_scope() {
        let cancel = CancelToken::default();
        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let start = Instant::now();
        let result = execute(
            &snippet("pwd\nsleep 30\n"),
            &sh_toolchain(),
            &options(Duration::from_secs(60)),
            &cancel,
        );
        canceller.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(result.status, ExecutionStatus::CrashedRuntime);
        assert!(result.stderr.contains("[snipcheck] interrupted"));
        let scope_dir = result.stdout.lines().next().unwrap();
        assert!(scope_dir.contains(SCOPE_PREFIX));
        assert!(!Path::new(scope_dir).exists());
    }

    #[test]
    fn unrepresentable_deadline_is_reported_as_crash() {
        let result = run("echo hi\n", &sh_toolchain(), Duration::MAX);
        assert_eq!(result.status, ExecutionStatus::CrashedRuntime);
        assert!(result.stderr.contains("out of range"));
    }

    #[test]
    fn missing_program_is_reported_as_crash() {
        let toolchain = ToolchainSpec {
            run: "snipcheck-missing-runner {source}".to_string(),
            ..sh_toolchain()
        };
        let result = run("echo hi\n", &toolchain, Duration::from_secs(10));
        assert_eq!(result.status, ExecutionStatus::CrashedRuntime);
        assert!(result.stderr.contains("sandbox setup failed"));
    }
}
