// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The tap: registers a sample schema with the CHP map, then publishes
//! timestamped samples to the forwarder (`spec.md` §4.D, grounded on
//! `original_source/src/tap.cpp`'s `Tap::init`/`Tap::start`/`Tap::publisherThread`).
//!
//! Mirrors the reference tap's lifecycle (`init` -> register fields ->
//! `start` -> `log` repeatedly -> `stop`) but replaces its raw
//! pointer-to-member-variable `AbstractDataRefItem` fields with named,
//! width-checked slots: `add_item` declares a field's name/type/width, and
//! `log` hands over the matching byte slices by position.

use lager_core::chp::ChpClient;
use lager_core::error::LagerError;
use lager_core::ports::PortLayout;
use lager_core::sample::SampleMessage;
use lager_core::schema::{self, DataFormat};
use lager_core::time::now_ns;
use lager_core::wire;
use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

const POLL_SLICE: Duration = Duration::from_millis(100);
const SLOW_JOINER_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Uninit,
    Initialized,
    Running,
    Stopped,
}

struct FieldSlot {
    name: String,
    type_name: String,
    size: u32,
}

pub struct Tap {
    state: TapState,
    server_host: String,
    base_port: i32,
    fields: Vec<FieldSlot>,
    chp_client: Option<ChpClient>,
    forwarder_port: u16,
    key: Option<String>,
    version: Option<String>,
    running: Arc<AtomicBool>,
    publisher_tx: Option<mpsc::Sender<SampleMessage>>,
    workers: Vec<JoinHandle<()>>,
    format: Arc<Mutex<Option<DataFormat>>>,
}

impl Tap {
    pub fn new() -> Self {
        Self {
            state: TapState::Uninit,
            server_host: String::new(),
            base_port: 0,
            fields: Vec::new(),
            chp_client: None,
            forwarder_port: 0,
            key: None,
            version: None,
            running: Arc::new(AtomicBool::new(false)),
            publisher_tx: None,
            workers: Vec::new(),
            format: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    /// The identity this tap stamps on every sample it publishes.
    pub fn uuid(&self) -> lager_core::chp::ids::Uuid {
        self.chp_client
            .as_ref()
            .map(|c| c.uuid())
            .unwrap_or_else(lager_core::chp::ids::generate)
    }

    /// Resolves ports and creates the CHP client. Does not start any worker
    /// yet (`spec.md` §4.D: `init` then `start`).
    pub fn init(&mut self, server_host: impl Into<String>, base_port: i32) -> Result<(), LagerError> {
        let host = server_host.into();
        let layout = PortLayout::resolve(base_port)?;
        self.chp_client = Some(ChpClient::new(host.clone(), base_port)?);
        self.server_host = host;
        self.base_port = base_port;
        self.forwarder_port = layout.forwarder_frontend;
        self.state = TapState::Initialized;
        Ok(())
    }

    /// Declares one field of the sample layout. Idempotent by name: adding
    /// a field whose name matches an existing one replaces it in place
    /// rather than appending a duplicate.
    pub fn add_item(&mut self, name: impl Into<String>, type_name: impl Into<String>, size: u32) {
        let name = name.into();
        let slot = FieldSlot {
            name: name.clone(),
            type_name: type_name.into(),
            size,
        };
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => *existing = slot,
            None => self.fields.push(slot),
        }
    }

    /// Builds the schema from the registered fields, registers it with the
    /// CHP map under `key`, and starts the CHP client and publisher worker.
    pub fn start(&mut self, key: impl Into<String>, version: impl Into<String>) -> Result<(), LagerError> {
        if self.state == TapState::Uninit {
            return Err(LagerError::NotInitialized);
        }
        let key = key.into();
        let version = version.into();

        let items: Vec<(String, String, u32)> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.type_name.clone(), f.size))
            .collect();
        let format = schema::create_from_items(&version, &items);
        let format_xml = render_schema_xml(&format);

        let client = self.chp_client.as_mut().ok_or(LagerError::NotInitialized)?;
        client.start()?;
        client.publish(&key, &format_xml)?;

        *self.format.lock() = Some(format);
        self.key = Some(key);
        self.version = Some(version);

        self.running.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        self.publisher_tx = Some(tx);

        let running = self.running.clone();
        let host = self.server_host.clone();
        let port = self.forwarder_port;
        let handle = thread::spawn(move || publisher_worker(host, port, rx, running));
        self.workers = vec![handle];

        self.state = TapState::Running;
        info!(key = %self.key.as_deref().unwrap_or(""), "tap started");
        Ok(())
    }

    /// Publishes one sample, fire-and-forget. `fields` must match the
    /// registered field widths, in order.
    pub fn log(&self, fields: Vec<Vec<u8>>) -> Result<(), LagerError> {
        if self.state != TapState::Running {
            return Err(LagerError::NotInitialized);
        }
        if fields.len() != self.fields.len() {
            return Err(LagerError::FieldCountMismatch {
                expected: self.fields.len(),
                got: fields.len(),
            });
        }
        for (index, (field, slot)) in fields.iter().zip(self.fields.iter()).enumerate() {
            if field.len() as u32 != slot.size {
                return Err(LagerError::FieldWidthMismatch {
                    index,
                    expected: slot.size,
                    got: field.len(),
                });
            }
        }

        let tx = self.publisher_tx.as_ref().ok_or(LagerError::NotInitialized)?;
        let version = self.version.as_deref().unwrap_or_default();
        let msg = SampleMessage::new(self.uuid(), version, now_ns(), fields);
        tx.send(msg).map_err(|_| LagerError::NotInitialized)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.publisher_tx = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(client) = self.chp_client.as_mut() {
            client.stop();
        }
        self.state = TapState::Stopped;
    }
}

impl Default for Tap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Tap {
    fn drop(&mut self) {
        if self.state == TapState::Running {
            self.stop();
        }
    }
}

fn render_schema_xml(format: &DataFormat) -> String {
    let mut xml = format!("<format version=\"{}\">", format.version);
    for item in &format.items {
        xml.push_str(&format!(
            "<item name=\"{}\" type=\"{}\" size=\"{}\" offset=\"{}\"/>",
            item.name, item.type_name, item.size, item.offset
        ));
    }
    xml.push_str("</format>");
    xml
}

fn publisher_worker(host: String, port: u16, rx: mpsc::Receiver<SampleMessage>, running: Arc<AtomicBool>) {
    let mut stream: Option<TcpStream> = None;
    thread::sleep(SLOW_JOINER_DELAY);

    while running.load(Ordering::SeqCst) {
        let msg = match rx.recv_timeout(POLL_SLICE) {
            Ok(msg) => msg,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        loop {
            if stream.is_none() {
                stream = TcpStream::connect((host.as_str(), port)).ok();
                if stream.is_none() {
                    thread::sleep(POLL_SLICE);
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    continue;
                }
            }
            let Some(s) = stream.as_mut() else { continue };
            match wire::write_message(s, &msg.encode()) {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "sample publish failed, reconnecting");
                    stream = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_item_is_idempotent_by_name() {
        let mut tap = Tap::new();
        tap.add_item("col1", "integer", 4);
        tap.add_item("col1", "string", 8);
        assert_eq!(tap.fields.len(), 1);
        assert_eq!(tap.fields[0].type_name, "string");
        assert_eq!(tap.fields[0].size, 8);
    }

    #[test]
    fn start_before_init_fails() {
        let mut tap = Tap::new();
        assert_eq!(tap.start("key", "v1"), Err(LagerError::NotInitialized));
    }

    #[test]
    fn log_before_start_fails() {
        let mut tap = Tap::new();
        tap.init("127.0.0.1", 18000).unwrap();
        assert_eq!(tap.log(vec![]), Err(LagerError::NotInitialized));
    }
}
