// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The mug: subscribes to the forwarder's backend, decodes samples against
//! schemas mirrored from the CHP map, and writes them to a keg
//! (`spec.md` §4.E, grounded on `original_source/src/mug.cpp`'s
//! `Mug::init`/`Mug::start`/`Mug::hashMapUpdated`/`Mug::subscriberThread`).

use lager_core::chp::ids::Uuid;
use lager_core::chp::ChpClient;
use lager_core::error::LagerError;
use lager_core::keg::{FileKeg, Keg};
use lager_core::ports::PortLayout;
use lager_core::sample::SampleMessage;
use lager_core::schema::{self, DataFormat};
use lager_core::wire;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const POLL_SLICE: Duration = Duration::from_millis(100);

/// The mug (`spec.md` §4.E).
pub struct Mug {
    chp_client: ChpClient,
    keg: Arc<dyn Keg>,
    format_map: Arc<Mutex<HashMap<Uuid, DataFormat>>>,
    backend_host: String,
    backend_port: u16,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Mug {
    pub fn init(
        server_host: impl Into<String>,
        base_port: i32,
        keg_dir: impl AsRef<Path>,
    ) -> Result<Self, LagerError> {
        let host = server_host.into();
        let layout = PortLayout::resolve(base_port)?;

        let chp_client = ChpClient::new(host.clone(), base_port)?;
        let keg: Arc<dyn Keg> = Arc::new(FileKeg::new(keg_dir.as_ref().to_path_buf()));
        let format_map = Arc::new(Mutex::new(HashMap::new()));

        let callback_format_map = format_map.clone();
        let callback_keg = keg.clone();
        chp_client.set_callback(move |value_map, uuid_map| {
            refresh_formats(value_map, uuid_map, &callback_format_map, callback_keg.as_ref());
        });

        Ok(Self {
            chp_client,
            keg,
            format_map,
            backend_host: host,
            backend_port: layout.forwarder_backend,
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        })
    }

    pub fn start(&mut self) -> Result<(), LagerError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(LagerError::AlreadyRunning);
        }
        self.keg.start()?;
        self.chp_client.start()?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let keg = self.keg.clone();
        let host = self.backend_host.clone();
        let port = self.backend_port;
        let handle = thread::spawn(move || subscriber_worker(host, port, keg, running));
        self.workers = vec![handle];
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.chp_client.stop();
        let _ = self.keg.stop();
    }

    pub fn format_for(&self, uuid: Uuid) -> Option<DataFormat> {
        self.format_map.lock().get(&uuid).cloned()
    }
}

impl Drop for Mug {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Mirrors `Mug::hashMapUpdated`: whenever the CHP map changes, re-parse
/// every registered schema, re-index it by owner UUID, and register it with
/// the keg so the subscriber loop can resolve and record incoming samples.
fn refresh_formats(
    value_map: &HashMap<String, String>,
    uuid_map: &HashMap<Uuid, String>,
    format_map: &Mutex<HashMap<Uuid, DataFormat>>,
    keg: &dyn Keg,
) {
    let mut indexed = HashMap::new();
    for (uuid, key) in &uuid_map {
        if let Some(xml) = value_map.get(key) {
            match schema::parse_from_string(xml) {
                Ok(format) => {
                    if keg.add_format(*uuid, xml).is_ok() {
                        indexed.insert(*uuid, format);
                    }
                }
                Err(e) => debug!(key, error = %e, "skipping unparseable schema"),
            }
        }
    }
    *format_map.lock() = indexed;
}

fn subscriber_worker(host: String, port: u16, keg: Arc<dyn Keg>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let Ok(mut stream) = TcpStream::connect((host.as_str(), port)) else {
            thread::sleep(POLL_SLICE);
            continue;
        };
        stream.set_read_timeout(Some(POLL_SLICE)).ok();

        while running.load(Ordering::SeqCst) {
            match wire::read_message(&mut stream) {
                Ok(frames) => handle_sample(&frames, &keg),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => break,
            }
        }
    }
}

/// Writes the sample's `uuid ++ timestamp` prefix followed by each data
/// field, one `keg.write` call per field — preserving the reference
/// implementation's incremental-write behavior rather than batching the
/// whole sample into a single write.
fn handle_sample(frames: &[Vec<u8>], keg: &Arc<dyn Keg>) {
    let msg = match SampleMessage::decode(frames) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "dropping malformed sample");
            return;
        }
    };

    let mut buffer = msg.keg_prefix();
    for field in &msg.fields {
        buffer.extend_from_slice(field);
        if let Err(e) = keg.write(&buffer, buffer.len()) {
            warn!(error = %e, "keg write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_resolves_backend_port() {
        let dir = tempfile::tempdir().unwrap();
        let mug = Mug::init("127.0.0.1", 18500, dir.path()).unwrap();
        assert_eq!(mug.backend_port, 18504);
    }

    #[test]
    fn format_for_unknown_uuid_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mug = Mug::init("127.0.0.1", 18600, dir.path()).unwrap();
        assert!(mug.format_for(Uuid::nil()).is_none());
    }
}
