//! Run coordination: documents in, report out.
//!
//! Extraction and pairing happen up front on the calling thread. Execution
//! fans out over a bounded pool of worker threads; verdicts are slotted back by
//! position so the report order never depends on completion order.
use crate::config::VerifyConfig;
use crate::diff::{judge, Verdict};
use crate::document::Document;
use crate::extract::collect_blocks;
use crate::pairing::{pair_snippets, PairingRules, Snippet, SnippetRef};
use crate::report::Report;
use crate::sandbox::{self, CancelToken, ExecutionResult, SandboxOptions};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::thread;

/// Extract and pair every document, in lexicographic document order.
pub fn plan_snippets(documents: &[Document], rules: &PairingRules) -> Vec<Snippet> {
    let mut ordered: Vec<&Document> = documents.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    ordered
        .into_iter()
        .flat_map(|document| pair_snippets(&collect_blocks(document), rules))
        .collect()
}

/// Fail fast when a snippet's language has no usable toolchain on this host.
pub fn preflight(snippets: &[Snippet], config: &VerifyConfig) -> Result<()> {
    let languages: BTreeSet<&str> = snippets
        .iter()
        .map(|snippet| snippet.block.language.as_str())
        .collect();
    for language in languages {
        let toolchain = config
            .toolchains
            .get(language)
            .ok_or_else(|| anyhow!("no toolchain registered for language {language:?}"))?;
        for program in toolchain.required_programs()? {
            which::which(&program).with_context(|| {
                format!("toolchain for {language:?} needs `{program}`, which was not found on PATH")
            })?;
        }
    }
    Ok(())
}

/// Run the whole pipeline over `documents`.
pub fn run(documents: &[Document], config: &VerifyConfig, cancel: &CancelToken) -> Result<Report> {
    let snippets = plan_snippets(documents, &config.pairing_rules());
    preflight(&snippets, config)?;
    tracing::info!(
        documents = documents.len(),
        snippets = snippets.len(),
        workers = config.worker_count(),
        "starting run"
    );

    let options = SandboxOptions {
        timeout: config.timeout(),
        max_output_bytes: config.max_output_bytes,
        env_passthrough: config.env_passthrough.clone(),
    };
    let report = run_snippets(snippets, config.worker_count(), cancel, |snippet| {
        match config.toolchains.get(&snippet.block.language) {
            Some(toolchain) => sandbox::execute(snippet, toolchain, &options, cancel),
            None => ExecutionResult::crashed(
                SnippetRef::from(snippet),
                format!("no toolchain for language {:?}", snippet.block.language),
                0,
            ),
        }
    });
    tracing::info!(
        passed = report.summary.passed,
        mismatched = report.summary.mismatched,
        errors = report.summary.errors,
        skipped = report.summary.skipped,
        interrupted = report.interrupted,
        "run finished"
    );
    Ok(report)
}

/// Execute and judge `snippets` on `workers` threads.
///
/// Workers stop taking jobs once `cancel` fires; snippets never started get an
/// interrupted verdict. Returns only after every worker has exited.
pub fn run_snippets<F>(
    snippets: Vec<Snippet>,
    workers: usize,
    cancel: &CancelToken,
    execute: F,
) -> Report
where
    F: Fn(&Snippet) -> ExecutionResult + Sync,
{
    let refs: Vec<SnippetRef> = snippets.iter().map(SnippetRef::from).collect();
    let mut slots: Vec<Option<Verdict>> = vec![None; snippets.len()];

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, Snippet)>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Verdict)>();
    for job in snippets.into_iter().enumerate() {
        // The receiver is alive for the whole function, so this cannot fail.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let worker_count = workers.max(1).min(refs.len().max(1));
    let execute = &execute;
    thread::scope(|scope| {
        for worker in 0..worker_count {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                while let Ok((position, snippet)) = job_rx.recv() {
                    if cancel.is_cancelled() {
                        tracing::debug!(worker, "worker stopping after interrupt");
                        break;
                    }
                    let result = execute(&snippet);
                    let verdict = judge(result, snippet.expected.as_ref());
                    if result_tx.send((position, verdict)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        for (position, verdict) in result_rx.iter() {
            slots[position] = Some(verdict);
        }
    });

    let verdicts = slots
        .into_iter()
        .zip(refs)
        .map(|(slot, snippet)| slot.unwrap_or_else(|| Verdict::interrupted(snippet)))
        .collect();
    Report::new(verdicts, cancel.is_cancelled())
}
