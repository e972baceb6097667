//! Run report: ordered verdicts plus summary counts.
use crate::diff::{Verdict, VerdictDetail, VerdictStatus};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: u32 = 1;
const DETAIL_MAX_LINES: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub mismatched: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl Summary {
    fn from_verdicts(verdicts: &[Verdict]) -> Self {
        let mut summary = Summary {
            total: verdicts.len(),
            ..Summary::default()
        };
        for verdict in verdicts {
            match verdict.status {
                VerdictStatus::Pass => summary.passed += 1,
                VerdictStatus::Mismatch => summary.mismatched += 1,
                VerdictStatus::Error => summary.errors += 1,
                VerdictStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub schema_version: u32,
    pub summary: Summary,
    pub interrupted: bool,
    pub verdicts: Vec<Verdict>,
}

impl Report {
    pub fn new(verdicts: Vec<Verdict>, interrupted: bool) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            summary: Summary::from_verdicts(&verdicts),
            interrupted,
            verdicts,
        }
    }

    /// True when every verdict is Pass or Skipped and the run was not cut short.
    pub fn success(&self) -> bool {
        !self.interrupted && !self.verdicts.iter().any(|verdict| verdict.status.fails_run())
    }

    pub fn exit_code(&self) -> u8 {
        if self.success() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize report")
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut text = self.to_json()?;
        text.push('\n');
        fs::write(path, text).with_context(|| format!("write report {}", path.display()))
    }

    /// Human-readable table followed by failure details and a summary line.
    pub fn render_table(&self) -> String {
        let header = ["DOCUMENT", "LINE", "BLOCK", "LANG", "VERDICT", "EXECUTION", "TIME"];
        let rows: Vec<[String; 7]> = self
            .verdicts
            .iter()
            .map(|verdict| {
                [
                    verdict.snippet.document.clone(),
                    verdict.snippet.line.to_string(),
                    format!("#{}", verdict.snippet.block_index),
                    verdict.snippet.language.clone(),
                    verdict.status.label().to_string(),
                    verdict.execution.label().to_string(),
                    format!("{}ms", verdict.duration_ms),
                ]
            })
            .collect();

        let mut widths = header.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.len());
            }
        }

        let mut out = String::new();
        if !rows.is_empty() {
            push_row(&mut out, &header.map(str::to_string), &widths);
            for row in &rows {
                push_row(&mut out, row, &widths);
            }
        }

        let failures: Vec<_> = self
            .verdicts
            .iter()
            .filter(|verdict| verdict.status.fails_run())
            .collect();
        if !failures.is_empty() {
            out.push('\n');
            for verdict in failures {
                let _ = writeln!(
                    out,
                    "{}:{} {}",
                    verdict.snippet.document,
                    verdict.snippet.line,
                    verdict.status.label()
                );
                if let Some(detail) = &verdict.detail {
                    out.push_str(&render_detail(detail));
                }
            }
        }

        let summary = &self.summary;
        let _ = writeln!(
            out,
            "\n{} snippet(s): {} passed, {} mismatched, {} error(s), {} skipped{}",
            summary.total,
            summary.passed,
            summary.mismatched,
            summary.errors,
            summary.skipped,
            if self.interrupted { " (interrupted)" } else { "" }
        );
        out
    }
}

fn push_row(out: &mut String, cells: &[String; 7], widths: &[usize; 7]) {
    let line = cells
        .iter()
        .zip(widths.iter())
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

fn render_detail(detail: &VerdictDetail) -> String {
    match detail {
        VerdictDetail::LineDiff {
            line,
            expected,
            actual,
            expected_lines,
            actual_lines,
        } => format!(
            "  line {line}: expected {}, actual {}\n  ({expected_lines} expected line(s), {actual_lines} actual line(s))\n",
            quoted(expected.as_deref()),
            quoted(actual.as_deref()),
        ),
        VerdictDetail::Stderr { text } => {
            let mut out = String::new();
            let lines: Vec<&str> = text.lines().collect();
            for line in lines.iter().take(DETAIL_MAX_LINES) {
                let _ = writeln!(out, "  | {line}");
            }
            if lines.len() > DETAIL_MAX_LINES {
                let _ = writeln!(out, "  | ... {} more line(s)", lines.len() - DETAIL_MAX_LINES);
            }
            out
        }
    }
}

fn quoted(line: Option<&str>) -> String {
    match line {
        Some(line) => format!("{line:?}"),
        None => "<end of output>".to_string(),
    }
}
