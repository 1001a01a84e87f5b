use std::sync::Arc;

use anyhow::Result;
use lib_simrail::ingestors::Pipeline;
use lib_simrail::loggers::setup_logging;

mod simrail_logic;
use simrail_logic::{config, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    setup_logging(&config.log_dir(), config.log_level(), "server_simrail")?;

    let ingest = config.ingest_config();
    log::info!(
        "Starting with panel {}, api {}, data in {}",
        ingest.panel_url,
        ingest.api_url,
        ingest.data_dir.display()
    );

    let pipeline = Arc::new(Pipeline::new(&ingest)?);
    shutdown::install_panic_flush(Arc::clone(&pipeline));
    pipeline.start();

    // Wait for shutdown signal
    let signal = shutdown::wait_for_signal().await?;
    log::info!("{} received, initiating shutdown.", signal);

    pipeline.stop();
    match pipeline.flush() {
        Ok(()) => log::info!("Analyzer state flushed."),
        Err(e) => log::error!("Final flush incomplete: {}", e),
    }

    log::info!("Shutdown complete.");
    Ok(())
}
