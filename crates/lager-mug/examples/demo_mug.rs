// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Subscribes to the forwarder's backend and records every sample into a
//! keg directory.
//!
//! ```bash
//! cargo run -p lager-mug --example demo_mug -- --base-port 6000 --keg-dir ./kegs
//! ```

use clap::Parser;
use lager_mug::Mug;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    server_host: String,

    #[arg(short = 'p', long, default_value = "6000")]
    base_port: i32,

    #[arg(long, default_value = "./kegs")]
    keg_dir: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut mug = Mug::init(&args.server_host, args.base_port, &args.keg_dir)?;
    mug.start()?;

    loop {
        thread::sleep(Duration::from_secs(1));
    }
}
