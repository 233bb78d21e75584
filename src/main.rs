//! ccd_daq server binary.

use anyhow::{Context, Result};
use ccd_daq::{app, cli::Cli, config::Settings, logging};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid command-line override")?;

    logging::init(&settings.application);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(settings.server.max_blocking_threads)
        .thread_name("ccd-daq")
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(app::serve(settings))?;
    tracing::info!("ccd_daq stopped");
    Ok(())
}
