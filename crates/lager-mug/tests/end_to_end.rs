// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Full tap -> forwarder -> mug round trip over real loopback sockets,
//! including schema propagation through the CHP map.

use lager_core::chp::ChpServer;
use lager_forwarder::Forwarder;
use lager_mug::Mug;
use lager_tap::Tap;
use std::thread;
use std::time::Duration;

fn settle() {
    thread::sleep(Duration::from_millis(300));
}

#[test]
fn sample_published_by_tap_is_recorded_by_mug() {
    let base_port = 18900;

    let mut server = ChpServer::new(base_port);
    server.init().unwrap();
    server.start().unwrap();

    let mut forwarder = Forwarder::new(base_port);
    forwarder.init().unwrap();
    forwarder.start().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut mug = Mug::init("127.0.0.1", base_port, dir.path()).unwrap();
    mug.start().unwrap();

    let mut tap = Tap::new();
    tap.init("127.0.0.1", base_port).unwrap();
    tap.add_item("counter", "integer", 4);
    tap.start("test/counter", "E2E0001").unwrap();

    // Give the schema time to replicate through the CHP map to the mug's
    // client before any samples are forwarded.
    settle();
    settle();

    tap.log(vec![42u32.to_le_bytes().to_vec()]).unwrap();
    settle();
    settle();

    let uuid = tap.uuid();
    let format = mug
        .format_for(uuid)
        .expect("mug should have mirrored the tap's schema");
    assert_eq!(format.version, "E2E0001");
    assert_eq!(format.items.len(), 1);
    assert_eq!(format.items[0].name, "counter");

    let keg_file = dir.path().join(format!("{uuid}.keg"));
    assert!(keg_file.exists(), "expected a keg data file for the tap's uuid");
    let written = std::fs::metadata(&keg_file).unwrap().len();
    assert!(written > 0, "keg file should contain the written sample");

    tap.stop();
    mug.stop();
    forwarder.stop();
    server.stop();
}
