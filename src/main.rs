use anyhow::Context;
use clap::Parser;

use spark::args::Args;
use spark::bootstrap;
use spark::config::Config;
use spark::logging::setup_logging;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging();

    let config = Config::try_from(args).context("Invalid configuration")?;
    bootstrap::run(&config).context("Server stopped")
}
