//! # QUIC Interop Runner - Main Entry Point
//!
//! The binary wires four things together:
//! 1. **Logging**: a colorized stderr subscriber; `-d` raises the level to
//!    DEBUG. Per-run records are buffered elsewhere and replayed here in
//!    order, so parallel runs never interleave.
//! 2. **Configuration**: CLI arguments are validated against the
//!    implementation registry and the test tables.
//! 3. **Execution**: the interop runner drives the full matrix.
//! 4. **Exit code**: the number of failed cells, so `0` means a clean run.
//!
//! An interrupt (Ctrl-C) brings the in-flight container groups down and
//! exits without writing any report.

use anyhow::Result;
use clap::Parser;
use quic_interop_runner::{
    cli::{Args, RunConfig},
    interop::InteropRunner,
    logging::ColorizedFormatter,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
        .init();

    let config = RunConfig::from_args(&args)?;
    info!(
        "Testing {} server(s) against {} client(s)",
        config.servers.len(),
        config.clients.len()
    );

    let runner = Arc::new(InteropRunner::new(config));

    // An interrupt cancels the run future, which kills the in-flight
    // composition processes; the explicit shutdown then reclaims the
    // container groups themselves. No results are exported.
    let failed = tokio::select! {
        result = Arc::clone(&runner).run() => result?,
        _ = tokio::signal::ctrl_c() => {
            error!("Interrupted, bringing container groups down");
            runner.shutdown().await;
            std::process::exit(130);
        }
    };

    if failed > 0 {
        info!("{} test case(s) failed", failed);
    }
    std::process::exit(failed as i32);
}
