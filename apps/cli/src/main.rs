//! eva3d CLI: asset reconciliation for CAD-derived 3D printer parts.
//!
//! Reconciles page BOMs against CAD export archives, fetches assemblies
//! from the CAD service, and produces the superbom, purchasing lists and
//! the packaged printable archive.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
