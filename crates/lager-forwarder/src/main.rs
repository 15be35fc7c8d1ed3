// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Standalone forwarder binary: relays samples from taps to mugs.
//!
//! # Usage
//!
//! ```bash
//! lager-forwarder --base-port 6500
//! ```

use clap::Parser;
use lager_forwarder::Forwarder;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lager-forwarder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base port; the frontend and backend sockets bind at fixed offsets from it.
    #[arg(short = 'p', long, default_value = "6500")]
    base_port: i32,

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

    let mut forwarder = Forwarder::new(args.base_port);
    forwarder.init()?;
    forwarder.start()?;
    info!(base_port = args.base_port, "forwarder running, ctrl-c to stop");

    ctrlc_block();

    forwarder.stop();
    Ok(())
}

/// Blocks the main thread until a shutdown signal arrives. `lager-core`'s
/// workers are OS threads, not an async runtime, so there's no executor to
/// park on; park this thread directly instead.
fn ctrlc_block() {
    let (tx, rx) = std::sync::mpsc::channel();
    let result = ctrlc::set_handler(move || {
        let _ = tx.send(());
    });
    if result.is_err() {
        error!("failed to install signal handler; blocking forever");
        loop {
            std::thread::sleep(std::time::Duration::from_secs(3600));
        }
    }
    let _ = rx.recv();
}
