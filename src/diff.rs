//! Turn execution results into verdicts.
use crate::config::Normalization;
use crate::pairing::{ExpectedOutput, SnippetRef};
use crate::sandbox::{ExecutionResult, ExecutionStatus};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Mismatch,
    Error,
    /// No expected output to compare against.
    Skipped,
}

impl VerdictStatus {
    pub fn label(&self) -> &'static str {
        match self {
            VerdictStatus::Pass => "PASS",
            VerdictStatus::Mismatch => "MISMATCH",
            VerdictStatus::Error => "ERROR",
            VerdictStatus::Skipped => "SKIPPED",
        }
    }

    pub fn fails_run(&self) -> bool {
        matches!(self, VerdictStatus::Mismatch | VerdictStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerdictDetail {
    /// First differing line (1-based) after normalization.
    LineDiff {
        line: usize,
        expected: Option<String>,
        actual: Option<String>,
        expected_lines: usize,
        actual_lines: usize,
    },
    Stderr {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub snippet: SnippetRef,
    pub status: VerdictStatus,
    pub execution: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<VerdictDetail>,
}

impl Verdict {
    /// Verdict for a snippet the run never reached because it was interrupted.
    pub fn interrupted(snippet: SnippetRef) -> Self {
        Self {
            snippet,
            status: VerdictStatus::Error,
            execution: ExecutionStatus::CrashedRuntime,
            exit_code: None,
            duration_ms: 0,
            detail: Some(VerdictDetail::Stderr {
                text: "run interrupted before execution".to_string(),
            }),
        }
    }
}

pub fn judge(result: ExecutionResult, expected: Option<&ExpectedOutput>) -> Verdict {
    let (status, detail) = match expected {
        None => (VerdictStatus::Skipped, None),
        Some(_) if result.status != ExecutionStatus::Completed => (
            VerdictStatus::Error,
            Some(VerdictDetail::Stderr {
                text: error_text(&result),
            }),
        ),
        Some(expected) => {
            let want = normalize(&expected.text, expected.normalization);
            let got = normalize(&result.stdout, expected.normalization);
            match first_difference(&want, &got) {
                None => (VerdictStatus::Pass, None),
                Some(diff) => (VerdictStatus::Mismatch, Some(diff)),
            }
        }
    };
    Verdict {
        snippet: result.snippet,
        status,
        execution: result.status,
        exit_code: result.exit_code,
        duration_ms: result.duration_ms,
        detail,
    }
}

fn error_text(result: &ExecutionResult) -> String {
    let stderr = result.stderr.trim_end();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match (result.exit_code, result.signal) {
        (_, Some(signal)) => format!("{} (signal {signal})", result.status.label()),
        (Some(code), None) => format!("{} (exit code {code})", result.status.label()),
        (None, None) => result.status.label().to_string(),
    }
}

pub fn normalize(text: &str, mode: Normalization) -> Vec<String> {
    match mode {
        Normalization::Exact => text.split('\n').map(str::to_string).collect(),
        Normalization::Trimmed => trimmed_lines(text),
        Normalization::OrderedLines => {
            let mut lines = trimmed_lines(text);
            lines.sort();
            lines
        }
    }
}

fn trimmed_lines(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let start = lines.iter().position(|line| !line.is_empty());
    let end = lines.iter().rposition(|line| !line.is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end]
            .iter()
            .map(|line| line.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

pub fn first_difference(expected: &[String], actual: &[String]) -> Option<VerdictDetail> {
    let len = expected.len().max(actual.len());
    (0..len)
        .find(|&idx| expected.get(idx) != actual.get(idx))
        .map(|idx| VerdictDetail::LineDiff {
            line: idx + 1,
            expected: expected.get(idx).cloned(),
            actual: actual.get(idx).cloned(),
            expected_lines: expected.len(),
            actual_lines: actual.len(),
        })
}
