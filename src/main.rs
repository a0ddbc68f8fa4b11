//! Proxy integration harness CLI
//!
//! Runs end-to-end scenarios against a pluggable-transport proxy binary and
//! reports every way the proxy misbehaved.

use std::path::PathBuf;

use clap::Parser;
use itest::cli::{self, GlobalOptions};
use itest::commands::Commands;
use itest::common::logging;

#[derive(Parser)]
#[command(name = "itest", about = "Integration test harness for obfuscating proxies")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Proxy program to test
    #[arg(long, global = true)]
    proxy: Option<PathBuf>,

    /// First port of the entry/server/exit block
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..=65533))]
    base_port: Option<u16>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    let options = GlobalOptions {
        config: cli.config,
        proxy: cli.proxy,
        base_port: cli.base_port,
    };

    match cli::dispatch(cli.command, &options).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
