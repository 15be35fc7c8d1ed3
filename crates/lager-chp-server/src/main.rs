// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Standalone CHP server binary.
//!
//! # Usage
//!
//! ```bash
//! lager-chp-server --base-port 6000
//! ```

use clap::Parser;
use lager_core::chp::ChpServer;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lager-chp-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base port; the snapshot, publisher, and collector sockets bind at
    /// fixed offsets from it.
    #[arg(short = 'p', long, default_value = "6000")]
    base_port: i32,

    /// Publisher heartbeat interval, in milliseconds.
    #[arg(long, default_value = "1000")]
    heartbeat_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut server = ChpServer::with_heartbeat_interval(
        args.base_port,
        Duration::from_millis(args.heartbeat_interval_ms),
    );
    server.init()?;
    server.start()?;
    info!(base_port = args.base_port, "CHP server running, ctrl-c to stop");

    let (tx, rx) = std::sync::mpsc::channel();
    if ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .is_err()
    {
        error!("failed to install signal handler; blocking forever");
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }
    let _ = rx.recv();

    server.stop();
    Ok(())
}
