//! stow - client for S3-compatible object storage
//!
//! Signs requests locally, transfers large objects in resumable parts and
//! can encrypt payloads before they leave the machine.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use stowage_cli::commands::{self, Cli};

const DEBUG_FILTER: &str = "stow_core=debug,stow_s3=debug,stowage_cli=debug";

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new(DEBUG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // stdout is reserved for command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let exit_code = commands::execute(cli).await;
    std::process::exit(exit_code.as_i32());
}
