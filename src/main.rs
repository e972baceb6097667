use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod coordinator;
mod diff;
mod document;
mod extract;
mod pairing;
mod report;
mod sandbox;
mod util;

use cli::{CheckArgs, Command, ConfigArgs, ListArgs, OutputFormat, RootArgs};
use sandbox::CancelToken;

/// Exit status for configuration, toolchain and input failures.
const FATAL_EXIT: u8 = 2;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    let result = match args.command {
        Command::Check(args) => cmd_check(args),
        Command::List(args) => cmd_list(args),
        Command::Config(args) => cmd_config(args),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(FATAL_EXIT)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "snipcheck=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_check(args: CheckArgs) -> Result<u8> {
    let config =
        config::load_effective_config(args.settings.config.as_deref(), &args.settings.overrides())?;
    let documents = document::load_documents(&args.paths)?;

    let cancel = CancelToken::default();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::warn!(%err, "failed to install interrupt handler");
    }

    let report = coordinator::run(&documents, &config, &cancel)?;
    if let Some(path) = &args.report {
        report.write_json(path)?;
    }
    match args.format {
        OutputFormat::Text => print!("{}", report.render_table()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(report.exit_code())
}

fn cmd_list(args: ListArgs) -> Result<u8> {
    let config =
        config::load_effective_config(args.settings.config.as_deref(), &args.settings.overrides())?;
    let documents = document::load_documents(&args.paths)?;
    let snippets = coordinator::plan_snippets(&documents, &config.pairing_rules());

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snippets)?),
        OutputFormat::Text => {
            for snippet in &snippets {
                let expected = match &snippet.expected {
                    Some(expected) => format!(
                        "expected output at block #{} ({})",
                        expected.source_block,
                        expected.normalization.as_str()
                    ),
                    None => "no expected output".to_string(),
                };
                println!(
                    "{}:{}  #{}  {}  {}",
                    snippet.document,
                    snippet.block.line,
                    snippet.block.index,
                    snippet.block.language,
                    expected
                );
            }
            println!("{} snippet(s)", snippets.len());
        }
    }
    Ok(0)
}

fn cmd_config(args: ConfigArgs) -> Result<u8> {
    let text = if args.effective {
        let config = config::load_effective_config(
            args.settings.config.as_deref(),
            &args.settings.overrides(),
        )?;
        serde_json::to_string_pretty(&config)?
    } else {
        config::config_stub()?
    };
    println!("{text}");
    Ok(0)
}
