//! charm-smoke - end-to-end smoke harness for the charm packing tool
//!
//! One invocation is one CI matrix job. The exit code is 0 only when every
//! stage of the job passed.

use std::path::PathBuf;

use charm_smoke::commands::Commands;
use charm_smoke::common::{config::Config, logging, paths};
use charm_smoke::cli;
use clap::Parser;

#[derive(Parser)]
#[command(name = "charm-smoke", about = "Smoke test harness for charmcraft")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/charm-smoke/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host label overriding detection, e.g. ubuntu-22.04. It must name the
    /// running release: destructive-mode pins and artifact names follow it
    #[arg(long, global = true)]
    host: Option<String>,

    /// Debug logging for this crate
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Write the log to the default job log location
    #[arg(long, global = true, conflicts_with = "log_file")]
    keep_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_file = cli
        .log_file
        .clone()
        .or_else(|| cli.keep_log.then(paths::default_log_file).flatten());
    let guard = logging::init_cli(cli.verbose, log_file.as_deref());

    let result = match Config::load(cli.config.as_deref()) {
        Ok(config) => cli::dispatch(cli.command, &config, cli.host.as_deref()).await,
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            tracing::error!(stage = e.stage(), "{}", e);
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the job log before exiting
    drop(guard);
    std::process::exit(code);
}
