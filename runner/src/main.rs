//! Importer service binary.
//!
//! Loads the configuration, initializes tracing and runs the configured import either as a long
//! running scheduler or, with `--once`, as a single due tick meant to be invoked by cron.

use clap::Parser;
use config::Environment;
use telemetry::tracing::init_tracing;
use tracing::error;

use crate::core::{RunMode, start_importer};

mod config_loader;
mod core;

#[derive(Debug, Parser)]
#[command(name = "importer", about = "Copies rows of a Postgres table to an event sink")]
struct Args {
    /// Run the ticks that are due and exit instead of scheduling ticks until shutdown.
    #[arg(long)]
    once: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let environment = Environment::load()?;
    init_tracing(env!("CARGO_BIN_NAME"), environment)?;

    let mode = if args.once {
        RunMode::Once
    } else {
        RunMode::Continuous
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if let Err(err) = runtime.block_on(start_importer(mode)) {
        error!(error = %err, "importer stopped with an error");
        return Err(err);
    }

    Ok(())
}
