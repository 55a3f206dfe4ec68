//! bock-storage CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use bock_storage::cli::Cli;
use bock_storage::reexec;

fn main() -> Result<()> {
    // Re-executed workers own stdout, dispatch before anything else
    reexec::init();

    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let directive = if cli.debug {
        "bock_storage=debug"
    } else {
        "bock_storage=info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    // Execute command
    cli.execute()
}
