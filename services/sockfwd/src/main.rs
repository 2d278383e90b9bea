//! sockfwd
//!
//! Forwards raw bytes between a listening socket and a fixed destination.
//!
//! This binary:
//! - Binds the source endpoint (TCP or Unix domain socket)
//! - Dials the destination for every accepted connection
//! - Copies bytes both ways until either side closes
//! - Dumps stats on SIGUSR1 and exits on SIGINT/SIGTERM/SIGQUIT

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use sockfwd::{
    logging, spawn_signal_listener, BufferPool, Config, ControlHandler, Forwarder, Listener, Stats,
    CONTROL_CHANNEL_CAPACITY,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::try_parse() {
        Ok(config) => config,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    logging::init(&config.log_level, config.log_format)?;

    info!(
        source = %config.source,
        destination = %config.destination,
        quiet = config.quiet,
        "Starting sockfwd"
    );

    let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    spawn_signal_listener(control_tx).context("failed to install signal handlers")?;

    let listener = Listener::bind(&config.source)
        .await
        .context("failed to start listener")?;

    let stats = Arc::new(Stats::new());
    let pool = Arc::new(BufferPool::new());
    let forwarder = Arc::new(
        Forwarder::new(
            config.destination.clone(),
            Arc::clone(&pool),
            Arc::clone(&stats),
        )
        .with_quiet(config.quiet),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept_loop = tokio::spawn(listener.run(forwarder, shutdown_rx));

    // Blocks until a shutdown command arrives
    ControlHandler::new(stats, pool, shutdown_tx)
        .run(control_rx)
        .await;

    // Only the listening socket is waited for; in-flight forwards are
    // dropped together with the runtime.
    if let Err(e) = accept_loop.await {
        error!(error = %e, "Accept loop task failed");
    }

    Ok(())
}
