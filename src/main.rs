//! `sgarchive`: archive a production-tracking database and query the
//! archive offline.

mod cli;
mod commands;
mod error;

use crate::cli::Cli;
use clap::Parser;
use sgarchive_archive::RunStatus;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Crates whose logs `-v` turns up. Everything else stays at `warn` unless
/// `RUST_LOG` says otherwise.
const CRATES: [&str; 7] = [
    "sgarchive",
    "sgarchive_archive",
    "sgarchive_config",
    "sgarchive_model",
    "sgarchive_remote",
    "sgarchive_replay",
    "sgarchive_storage",
];

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    tokio::spawn(interrupt(cancel.clone()));

    match commands::run(cli, cancel, &mut std::io::stdout()).await {
        Ok(status) => exit_code(status),
        Err(e) => {
            tracing::error!(error = ?e, "aborted");
            exit_code(RunStatus::Failed)
        },
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let directives = CRATES.iter().map(|krate| format!("{krate}={level}")).collect::<Vec<_>>().join(",");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("warn,{directives}")));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Cancel on the first Ctrl-C. Committed pages are kept, so the run can be
/// resumed later.
async fn interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupted, stopping after the current page");
        cancel.cancel();
    }
}

fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::from(1),
        RunStatus::Partial => ExitCode::from(2),
    }
}
