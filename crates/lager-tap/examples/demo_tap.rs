// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Publishes a two-field counter sample once a second.
//!
//! ```bash
//! cargo run -p lager-tap --example demo_tap -- --base-port 6000
//! ```

use clap::Parser;
use lager_tap::Tap;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    server_host: String,

    #[arg(short = 'p', long, default_value = "6000")]
    base_port: i32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut tap = Tap::new();
    tap.init(&args.server_host, args.base_port)?;
    tap.add_item("counter", "integer", 4);
    tap.add_item("flag", "byte", 1);
    tap.start("demo/counter", "DEMO001")?;

    let mut counter: u32 = 0;
    loop {
        tap.log(vec![counter.to_le_bytes().to_vec(), vec![1u8]])?;
        counter = counter.wrapping_add(1);
        thread::sleep(Duration::from_secs(1));
    }
}
