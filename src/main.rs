//! satmosaic CLI entrypoint.
//!
//! Provides a thin wrapper over the `cli` module: parse args, run one region
//! or a batch of named regions, write the manifest and exit with the
//! appropriate status. For programmatic use, prefer the library API
//! (`satmosaic::api`).

use clap::Parser;

mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();
    cli::run(args)
}
