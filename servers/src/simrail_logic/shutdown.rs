//! Shutdown triggers: termination signals and panics.

use std::sync::Arc;

use anyhow::Result;
use lib_simrail::ingestors::Pipeline;

/// Waits for Ctrl-C, SIGTERM, SIGUSR1 or SIGUSR2 and returns its name.
#[cfg(unix)]
pub async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT")
        }
        _ = term.recv() => Ok("SIGTERM"),
        _ = usr1.recv() => Ok("SIGUSR1"),
        _ = usr2.recv() => Ok("SIGUSR2"),
    }
}

/// Waits for Ctrl-C; the only shutdown signal outside Unix.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

/// Flushes analyzer state whenever a panic unwinds, then defers to the
/// previous hook. Worker panics are recovered by their orchestrator, so the
/// flush only ever costs a few file writes.
pub fn install_panic_flush(pipeline: Arc<Pipeline>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("Panic: {}. Flushing analyzer state.", info);
        let flushed = pipeline.try_flush();
        log::error!("{} of 3 analyzers flushed after panic.", flushed);
        previous(info);
    }));
}
