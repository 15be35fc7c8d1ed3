// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The CHP server: the authoritative replicated map, serving snapshots and
//! fanning out updates/heartbeats to every connected client (`spec.md` §4.B).
//!
//! Three workers run as independent OS threads over three consecutive TCP
//! ports, following the background-worker shape of
//! `hdds/src/engine/router.rs` (an `Arc<AtomicBool>` stop flag joined by
//! `stop()`) rather than the tokio-task style of `hdds-discovery-server`:
//! `spec.md` §5 mandates an OS-thread scheduling model with poll-based
//! timeouts, which maps directly onto blocking sockets plus
//! `set_read_timeout`/non-blocking `accept()`.

use super::entry::ChpMap;
use super::ids::Uuid;
use super::message::{ChpMessage, SnapshotRequest};
use crate::error::LagerError;
use crate::ports::{self, PortLayout};
use crate::wire;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the publisher worker wakes to check for new mutations
/// (`spec.md` §4.B "runs on a steady cadence").
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Granularity of the shutdown-responsive sleep loops used by every worker.
const POLL_SLICE: Duration = Duration::from_millis(100);
/// Read timeout applied to a freshly accepted snapshot/collector connection.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared, lock-protected server state, cloned (via `Arc`) into every worker.
struct ServerState {
    map: Mutex<ChpMap>,
    server_seq: AtomicU64,
    pending: Mutex<Vec<ChpMessage>>,
    subscribers: Mutex<SubscriberRegistry>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            map: Mutex::new(ChpMap::new()),
            server_seq: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            subscribers: Mutex::new(SubscriberRegistry::default()),
        }
    }

    /// Assigns the next sequence number, applies the mutation, and queues it
    /// for the publisher worker's next tick. Mirrors `spec.md` §3: "every
    /// accepted mutation assigns `sequence := server_seq + 1`".
    fn apply_and_queue(&self, key: &str, value: &str, owner_uuid: Uuid) -> u64 {
        let sequence = self.server_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.map.lock().apply(key, value, sequence, owner_uuid);
        self.pending.lock().push(ChpMessage {
            key: key.to_string(),
            sequence,
            owner_uuid: owner_uuid.as_bytes().to_vec(),
            properties: String::new(),
            value: value.to_string(),
        });
        sequence
    }
}

/// Registry of connected publisher-channel subscribers, each fed by its own
/// channel so a slow subscriber can't stall the others.
///
/// Grounded on `hdds-discovery-server/src/server/relay.rs`'s
/// `RelayRouter`/`ClientConnectionHandle`, adapted from tokio mpsc to
/// `std::sync::mpsc` for the thread-based worker model this component uses.
#[derive(Default)]
struct SubscriberRegistry {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<ChpMessage>>,
}

impl SubscriberRegistry {
    fn register(&mut self) -> (u64, mpsc::Receiver<ChpMessage>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::channel();
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    fn unregister(&mut self, id: u64) {
        self.subscribers.remove(&id);
    }

    fn broadcast(&mut self, msg: &ChpMessage) {
        self.subscribers.retain(|_, tx| tx.send(msg.clone()).is_ok());
    }
}

/// The CHP server (`spec.md` §4.B).
pub struct ChpServer {
    base_port: i32,
    heartbeat_interval: Duration,
    state: Arc<ServerState>,
    running: Arc<AtomicBool>,
    listeners: Option<(TcpListener, TcpListener, TcpListener)>,
    workers: Vec<JoinHandle<()>>,
    layout: Option<PortLayout>,
}

impl ChpServer {
    /// Builds an uninitialized server for `base_port`, using the default
    /// 1-second heartbeat interval.
    pub fn new(base_port: i32) -> Self {
        Self::with_heartbeat_interval(base_port, DEFAULT_HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat_interval(base_port: i32, heartbeat_interval: Duration) -> Self {
        Self {
            base_port,
            heartbeat_interval,
            state: Arc::new(ServerState::new()),
            running: Arc::new(AtomicBool::new(false)),
            listeners: None,
            workers: Vec::new(),
            layout: None,
        }
    }

    /// Binds the snapshot, publisher, and collector ports. May fail with
    /// `InvalidPort` (out-of-range offset) or `BindError` (port taken).
    pub fn init(&mut self) -> Result<(), LagerError> {
        let layout = PortLayout::resolve(self.base_port)?;

        let snapshot = bind(layout.snapshot)?;
        let publisher = bind(layout.publisher)?;
        let collector = bind(layout.collector)?;

        self.listeners = Some((snapshot, publisher, collector));
        self.layout = Some(layout);
        Ok(())
    }

    /// Launches the three workers. Fails with `NotInitialized` if `init()`
    /// was never called, or `AlreadyRunning` if already started.
    pub fn start(&mut self) -> Result<(), LagerError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(LagerError::AlreadyRunning);
        }
        let (snapshot, publisher, collector) =
            self.listeners.take().ok_or(LagerError::NotInitialized)?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let state = self.state.clone();
        let snapshot_handle = thread::spawn(move || snapshot_worker(snapshot, state, running));

        let running = self.running.clone();
        let state = self.state.clone();
        let interval = self.heartbeat_interval;
        let publisher_handle =
            thread::spawn(move || publisher_worker(publisher, state, running, interval));

        let running = self.running.clone();
        let state = self.state.clone();
        let collector_handle = thread::spawn(move || collector_worker(collector, state, running));

        self.workers = vec![snapshot_handle, publisher_handle, collector_handle];
        info!(base_port = self.base_port, "CHP server started");
        Ok(())
    }

    /// Signals shutdown and joins every worker before returning. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Assigns the next sequence and applies a locally-originated mutation
    /// (no owning client — used by the server's own operator/test surface).
    pub fn add_or_update(&self, key: &str, value: &str) -> u64 {
        self.state.apply_and_queue(key, value, Uuid::nil())
    }

    pub fn remove(&self, key: &str) -> u64 {
        self.add_or_update(key, "")
    }

    /// Snapshot-consistent copy of the current `key -> value` map.
    pub fn get_map(&self) -> HashMap<String, String> {
        self.state.map.lock().to_value_map()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ChpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind(port: u16) -> Result<TcpListener, LagerError> {
    let addr = format!("127.0.0.1:{port}");
    TcpListener::bind(&addr).map_err(|e| LagerError::BindError {
        addr,
        reason: e.to_string(),
    })
}

/// Sleeps in `POLL_SLICE` increments up to `total`, returning early once
/// `running` goes false so workers stay responsive to `stop()`.
fn responsive_sleep(total: Duration, running: &AtomicBool) {
    let mut elapsed = Duration::ZERO;
    while elapsed < total && running.load(Ordering::SeqCst) {
        let slice = POLL_SLICE.min(total - elapsed);
        thread::sleep(slice);
        elapsed += slice;
    }
}

// ---------------------------------------------------------------------
// Snapshot worker
// ---------------------------------------------------------------------

fn snapshot_worker(listener: TcpListener, state: Arc<ServerState>, running: Arc<AtomicBool>) {
    listener.set_nonblocking(true).ok();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let state = state.clone();
                thread::spawn(move || {
                    if let Err(e) = serve_snapshot(stream, &state) {
                        debug!(error = %e, "snapshot connection ended");
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_SLICE),
            Err(e) => {
                warn!(error = %e, "snapshot accept error");
                thread::sleep(POLL_SLICE);
            }
        }
    }
}

fn serve_snapshot(mut stream: TcpStream, state: &ServerState) -> io::Result<()> {
    stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;

    let frames = wire::read_message(&mut stream)?;
    let request = SnapshotRequest::decode(&frames)?;

    let (entries, current_seq) = {
        let map = state.map.lock();
        let entries: Vec<(String, super::entry::Entry)> = map
            .iter()
            .filter(|(k, _)| k.starts_with(&request.subtree))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        (entries, state.server_seq.load(Ordering::SeqCst))
    };

    for (key, entry) in entries {
        // An entry with an empty value can't exist in the map (apply()
        // deletes on empty value), but guard anyway per the Open Question
        // in `spec.md` §9: skip rather than error.
        if entry.value.is_empty() {
            continue;
        }
        let msg = ChpMessage {
            key,
            sequence: entry.sequence,
            owner_uuid: entry.owner_uuid.as_bytes().to_vec(),
            properties: String::new(),
            value: entry.value,
        };
        wire::write_message(&mut stream, &msg.encode())?;
    }

    let terminator = ChpMessage::terminator(current_seq, &request.subtree);
    wire::write_message(&mut stream, &terminator.encode())
}

// ---------------------------------------------------------------------
// Publisher worker
// ---------------------------------------------------------------------

fn publisher_worker(
    listener: TcpListener,
    state: Arc<ServerState>,
    running: Arc<AtomicBool>,
    heartbeat_interval: Duration,
) {
    listener.set_nonblocking(true).ok();

    let accept_running = running.clone();
    let accept_state = state.clone();
    let acceptor = thread::spawn(move || {
        while accept_running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let (id, rx) = accept_state.subscribers.lock().register();
                    let state = accept_state.clone();
                    let running = accept_running.clone();
                    thread::spawn(move || {
                        run_subscriber_writer(stream, rx, &running);
                        state.subscribers.lock().unregister(id);
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_SLICE),
                Err(e) => {
                    warn!(error = %e, "publisher accept error");
                    thread::sleep(POLL_SLICE);
                }
            }
        }
    });

    while running.load(Ordering::SeqCst) {
        responsive_sleep(heartbeat_interval, &running);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let updates = std::mem::take(&mut *state.pending.lock());
        let mut registry = state.subscribers.lock();
        if updates.is_empty() {
            registry.broadcast(&ChpMessage::heartbeat());
        } else {
            for update in &updates {
                registry.broadcast(update);
            }
        }
    }

    let _ = acceptor.join();
}

fn run_subscriber_writer(mut stream: TcpStream, rx: mpsc::Receiver<ChpMessage>, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_SLICE) {
            Ok(msg) => {
                if wire::write_message(&mut stream, &msg.encode()).is_err() {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ---------------------------------------------------------------------
// Collector worker
// ---------------------------------------------------------------------

fn collector_worker(listener: TcpListener, state: Arc<ServerState>, running: Arc<AtomicBool>) {
    listener.set_nonblocking(true).ok();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let state = state.clone();
                let running = running.clone();
                thread::spawn(move || serve_collector(stream, &state, &running));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_SLICE),
            Err(e) => {
                warn!(error = %e, "collector accept error");
                thread::sleep(POLL_SLICE);
            }
        }
    }
}

fn serve_collector(mut stream: TcpStream, state: &ServerState, running: &AtomicBool) {
    stream.set_read_timeout(Some(POLL_SLICE)).ok();
    while running.load(Ordering::SeqCst) {
        match wire::read_message(&mut stream) {
            Ok(frames) => match ChpMessage::decode(&frames) {
                Ok(msg) => {
                    let owner = Uuid::from_slice(&msg.owner_uuid).unwrap_or(Uuid::nil());
                    // The incoming sequence field is ignored; the server
                    // stamps its own (`spec.md` §4.B).
                    state.apply_and_queue(&msg.key, &msg.value, owner);
                }
                Err(e) => {
                    debug!(error = %e, "dropping malformed collector message");
                }
            },
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_start_fails() {
        let mut server = ChpServer::new(0);
        assert_eq!(server.start(), Err(LagerError::NotInitialized));
    }

    #[test]
    fn solo_add_and_remove() {
        let mut server = ChpServer::new(19700);
        server.init().unwrap();
        server.start().unwrap();

        assert_eq!(server.get_map().len(), 0);
        server.add_or_update("testkey", "testvalue");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.get_map().get("testkey").unwrap(), "testvalue");

        server.remove("testkey");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.get_map().len(), 0);

        server.stop();
    }

    #[test]
    fn stop_is_idempotent_and_safe_before_start() {
        let mut server = ChpServer::new(0);
        server.stop();
        server.stop();
    }
}
