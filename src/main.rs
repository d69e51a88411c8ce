//! safe-merge - merge a GitHub PR through branch protection, then restore it

mod cli;

use clap::{ArgAction, Parser};
use cli::MergeArgs;
use cli::style::Stylize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Merge a GitHub pull request by temporarily relaxing the base branch's
/// protection, restoring it afterwards no matter what
#[derive(Parser)]
#[command(name = "safe-merge", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    merge: MergeArgs,

    /// More logging (-v debug, -vv trace); RUST_LOG takes over when unset
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("safe_merge=debug"),
        _ => EnvFilter::new("safe_merge=trace,octocrab=debug,reqwest=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli::run_merge(cli.merge).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            anstream::eprintln!("{} {e}", "error:".failure());
            ExitCode::from(e.exit_code())
        }
    }
}
