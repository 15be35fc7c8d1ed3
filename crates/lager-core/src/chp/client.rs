// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The CHP client: mirrors the server's map locally via an initial snapshot
//! followed by a continuous subscription, and publishes local mutations
//! fire-and-forget (`spec.md` §4.C).
//!
//! Two worker threads (snapshot, subscriber) share one `parking_lot::Mutex`
//! around the mirrored state, following the single-lock-per-component shape
//! of `hdds/src/engine/router.rs`. Mutation publishing is its own worker,
//! fed by an `mpsc` channel — the Open Question in `spec.md` §9 ("should
//! every mutation spawn its own ephemeral thread?") is resolved here in
//! favor of one long-lived serializing worker, per the re-architecture hint
//! in that same section.

use super::entry::ChpMap;
use super::ids::{self, Uuid};
use super::message::{ChpMessage, SnapshotRequest};
use crate::error::LagerError;
use crate::ports::PortLayout;
use crate::wire;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long the subscriber waits for a `HUGZ`/update before the mirror is
/// declared stale and a fresh snapshot is requested (`spec.md` §4.C).
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);
/// Read-timeout granularity used so worker loops stay responsive to `stop()`.
const POLL_SLICE: Duration = Duration::from_millis(100);
/// Delay between a subscriber socket connecting and the first snapshot
/// request, so published updates racing the snapshot aren't missed — the
/// classic PUB/SUB "slow joiner" gap.
const SLOW_JOINER_DELAY: Duration = Duration::from_secs(1);

type Callback = Box<dyn Fn(&HashMap<String, String>, &HashMap<Uuid, String>) + Send + Sync>;

struct ClientState {
    map: ChpMap,
    /// Highest sequence number ever applied, from either a snapshot
    /// terminator or a subscriber update (`spec.md` §4.C). Gates both
    /// paths so a stale, wholesale-replacing snapshot can never clobber a
    /// live update the subscriber loop already applied.
    local_sequence: u64,
    last_heartbeat: Instant,
    timed_out: bool,
}

struct ClientInner {
    state: Mutex<ClientState>,
    callback: Mutex<Option<Callback>>,
}

impl ClientInner {
    fn fire_callback(&self) {
        let (value_map, uuid_map) = {
            let state = self.state.lock();
            (state.map.to_value_map(), state.map.to_uuid_map())
        };
        if let Some(cb) = self.callback.lock().as_ref() {
            cb(&value_map, &uuid_map);
        }
    }
}

/// The CHP client (`spec.md` §4.C).
pub struct ChpClient {
    host: String,
    layout: PortLayout,
    uuid: Uuid,
    heartbeat_timeout: Duration,
    inner: Arc<ClientInner>,
    running: Arc<AtomicBool>,
    need_snapshot: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    mutation_tx: Option<mpsc::Sender<ChpMessage>>,
}

impl ChpClient {
    pub fn new(host: impl Into<String>, base_port: i32) -> Result<Self, LagerError> {
        Self::with_heartbeat_timeout(host, base_port, DEFAULT_HEARTBEAT_TIMEOUT)
    }

    pub fn with_heartbeat_timeout(
        host: impl Into<String>,
        base_port: i32,
        heartbeat_timeout: Duration,
    ) -> Result<Self, LagerError> {
        let layout = PortLayout::resolve(base_port)?;
        Ok(Self {
            host: host.into(),
            layout,
            uuid: ids::generate(),
            heartbeat_timeout,
            inner: Arc::new(ClientInner {
                state: Mutex::new(ClientState {
                    map: ChpMap::new(),
                    local_sequence: 0,
                    last_heartbeat: Instant::now(),
                    timed_out: false,
                }),
                callback: Mutex::new(None),
            }),
            running: Arc::new(AtomicBool::new(false)),
            need_snapshot: Arc::new(AtomicBool::new(true)),
            workers: Vec::new(),
            mutation_tx: None,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Registers a callback fired (outside any internal lock) every time the
    /// mirrored map changes via a snapshot or a subscriber update. Receives
    /// a consistent pair of `(key -> value, owner_uuid -> key)` views taken
    /// under the same lock acquisition.
    pub fn set_callback(
        &self,
        callback: impl Fn(&HashMap<String, String>, &HashMap<Uuid, String>) + Send + Sync + 'static,
    ) {
        *self.inner.callback.lock() = Some(Box::new(callback));
    }

    pub fn start(&mut self) -> Result<(), LagerError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(LagerError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);
        self.need_snapshot.store(true, Ordering::SeqCst);
        {
            // Start the heartbeat/timeout clock at worker entry, not at
            // client construction, so a client that never reaches a server
            // still times out `heartbeat_timeout` after `start()`
            // (`spec.md` §8 scenario 5).
            let mut state = self.inner.state.lock();
            state.last_heartbeat = Instant::now();
            state.timed_out = false;
        }

        let (tx, rx) = mpsc::channel();
        self.mutation_tx = Some(tx);

        let running = self.running.clone();
        let inner = self.inner.clone();
        let need_snapshot = self.need_snapshot.clone();
        let host = self.host.clone();
        let port = self.layout.snapshot;
        let snapshot_handle =
            thread::spawn(move || snapshot_worker(host, port, inner, running, need_snapshot));

        let running = self.running.clone();
        let inner = self.inner.clone();
        let need_snapshot = self.need_snapshot.clone();
        let host = self.host.clone();
        let port = self.layout.publisher;
        let timeout = self.heartbeat_timeout;
        let subscriber_handle = thread::spawn(move || {
            subscriber_worker(host, port, inner, running, need_snapshot, timeout)
        });

        let running = self.running.clone();
        let host = self.host.clone();
        let port = self.layout.collector;
        let mutation_handle = thread::spawn(move || mutation_worker(host, port, rx, running));

        self.workers = vec![snapshot_handle, subscriber_handle, mutation_handle];
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.mutation_tx = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Fire-and-forget mutation publish. Returns `NotInitialized` if the
    /// client hasn't been started; never blocks on network I/O.
    pub fn publish(&self, key: &str, value: &str) -> Result<(), LagerError> {
        let tx = self.mutation_tx.as_ref().ok_or(LagerError::NotInitialized)?;
        let msg = ChpMessage {
            key: key.to_string(),
            sequence: 0,
            owner_uuid: self.uuid.as_bytes().to_vec(),
            properties: String::new(),
            value: value.to_string(),
        };
        tx.send(msg).map_err(|_| LagerError::NotInitialized)
    }

    pub fn remove(&self, key: &str) -> Result<(), LagerError> {
        self.publish(key, "")
    }

    pub fn get_map(&self) -> HashMap<String, String> {
        self.inner.state.lock().map.to_value_map()
    }

    /// `owner_uuid -> key` index of the mirrored map, used by a mug to
    /// resolve an incoming sample's UUID to its registered schema key.
    pub fn get_uuid_map(&self) -> HashMap<Uuid, String> {
        self.inner.state.lock().map.to_uuid_map()
    }

    pub fn is_timed_out(&self) -> bool {
        self.inner.state.lock().timed_out
    }
}

impl Drop for ChpClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connect_with_retry(host: &str, port: u16, running: &AtomicBool) -> Option<TcpStream> {
    while running.load(Ordering::SeqCst) {
        match TcpStream::connect((host, port)) {
            Ok(stream) => return Some(stream),
            Err(e) => {
                debug!(host, port, error = %e, "connect failed, retrying");
                thread::sleep(POLL_SLICE);
            }
        }
    }
    None
}

/// Like [`connect_with_retry`], but evaluates the heartbeat timeout on every
/// failed attempt instead of just blocking on the next retry. Without this,
/// a client that never reaches a server at all would retry forever without
/// ever reaching the `last_heartbeat.elapsed()` check, so `is_timed_out()`
/// would never become true (`spec.md` §8 scenario 5).
fn connect_for_subscriber(
    host: &str,
    port: u16,
    inner: &ClientInner,
    running: &AtomicBool,
    need_snapshot: &AtomicBool,
    heartbeat_timeout: Duration,
) -> Option<TcpStream> {
    while running.load(Ordering::SeqCst) {
        match TcpStream::connect((host, port)) {
            Ok(stream) => return Some(stream),
            Err(e) => debug!(host, port, error = %e, "connect failed, retrying"),
        }

        let elapsed = inner.state.lock().last_heartbeat.elapsed();
        if elapsed > heartbeat_timeout {
            inner.state.lock().timed_out = true;
            need_snapshot.store(true, Ordering::SeqCst);
        }
        thread::sleep(POLL_SLICE);
    }
    None
}

// ---------------------------------------------------------------------
// Snapshot worker
// ---------------------------------------------------------------------

fn snapshot_worker(
    host: String,
    port: u16,
    inner: Arc<ClientInner>,
    running: Arc<AtomicBool>,
    need_snapshot: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        if !need_snapshot.swap(false, Ordering::SeqCst) {
            thread::sleep(POLL_SLICE);
            continue;
        }

        match fetch_snapshot(&host, port, &running) {
            Ok(Some((staged, terminator_sequence))) => {
                {
                    // Merge, don't replace: drop any staged entry the client
                    // already has a newer (or equal) local_sequence for, so
                    // a live update the subscriber loop already applied can
                    // never be clobbered by an older staging batch
                    // (`spec.md` §4.C).
                    let mut state = inner.state.lock();
                    for (key, entry) in staged.iter() {
                        if entry.sequence <= state.local_sequence {
                            continue;
                        }
                        state
                            .map
                            .apply(key, &entry.value, entry.sequence, entry.owner_uuid);
                    }
                    state.local_sequence = state.local_sequence.max(terminator_sequence);
                    state.last_heartbeat = Instant::now();
                    state.timed_out = false;
                }
                inner.fire_callback();
            }
            Ok(None) => {
                // Shutdown raced the fetch; nothing to apply.
            }
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed, will retry");
                // Discard any partially staged state and try again later
                // rather than applying an inconsistent mirror.
                need_snapshot.store(true, Ordering::SeqCst);
                thread::sleep(POLL_SLICE);
            }
        }
    }
}

/// Fetches a full snapshot, returning the staged entries alongside the
/// terminator's sequence number so the caller can gate the merge and
/// advance `local_sequence` per `spec.md` §4.C.
fn fetch_snapshot(host: &str, port: u16, running: &AtomicBool) -> io::Result<Option<(ChpMap, u64)>> {
    let Some(mut stream) = connect_with_retry(host, port, running) else {
        return Ok(None);
    };
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let request = SnapshotRequest {
        subtree: String::new(),
    };
    wire::write_message(&mut stream, &request.encode())?;

    let mut staged = ChpMap::new();
    let mut terminator_sequence = 0u64;
    loop {
        let frames = wire::read_message(&mut stream)?;
        let msg = ChpMessage::decode(&frames)?;
        if msg.is_terminator() {
            terminator_sequence = msg.sequence;
            break;
        }
        if msg.is_heartbeat() {
            continue;
        }
        let owner = Uuid::from_slice(&msg.owner_uuid).unwrap_or(Uuid::nil());
        staged.apply(&msg.key, &msg.value, msg.sequence, owner);
    }
    Ok(Some((staged, terminator_sequence)))
}

// ---------------------------------------------------------------------
// Subscriber worker
// ---------------------------------------------------------------------

fn subscriber_worker(
    host: String,
    port: u16,
    inner: Arc<ClientInner>,
    running: Arc<AtomicBool>,
    need_snapshot: Arc<AtomicBool>,
    heartbeat_timeout: Duration,
) {
    while running.load(Ordering::SeqCst) {
        let Some(mut stream) =
            connect_for_subscriber(&host, port, &inner, &running, &need_snapshot, heartbeat_timeout)
        else {
            break;
        };
        if stream.set_read_timeout(Some(POLL_SLICE)).is_err() {
            continue;
        }
        thread::sleep(SLOW_JOINER_DELAY);
        inner.state.lock().last_heartbeat = Instant::now();

        'connection: while running.load(Ordering::SeqCst) {
            match wire::read_message(&mut stream) {
                Ok(frames) => match ChpMessage::decode(&frames) {
                    Ok(msg) => {
                        inner.state.lock().last_heartbeat = Instant::now();
                        if msg.is_heartbeat() {
                            continue;
                        }
                        let owner = Uuid::from_slice(&msg.owner_uuid).unwrap_or(Uuid::nil());
                        let applied = {
                            let mut state = inner.state.lock();
                            if msg.sequence <= state.local_sequence {
                                super::entry::ApplyOutcome::Rejected
                            } else {
                                let outcome =
                                    state.map.apply(&msg.key, &msg.value, msg.sequence, owner);
                                state.local_sequence = msg.sequence;
                                outcome
                            }
                        };
                        use super::entry::ApplyOutcome::*;
                        if matches!(applied, Inserted | Updated | Removed) {
                            inner.fire_callback();
                        }
                    }
                    Err(e) => debug!(error = %e, "dropping malformed subscriber message"),
                },
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    let elapsed = inner.state.lock().last_heartbeat.elapsed();
                    if elapsed > heartbeat_timeout {
                        inner.state.lock().timed_out = true;
                        need_snapshot.store(true, Ordering::SeqCst);
                        break 'connection;
                    }
                }
                Err(_) => break 'connection,
            }
        }
    }
}

// ---------------------------------------------------------------------
// Mutation publisher worker
// ---------------------------------------------------------------------

fn mutation_worker(
    host: String,
    port: u16,
    rx: mpsc::Receiver<ChpMessage>,
    running: Arc<AtomicBool>,
) {
    let mut stream: Option<TcpStream> = None;
    while running.load(Ordering::SeqCst) {
        let msg = match rx.recv_timeout(POLL_SLICE) {
            Ok(msg) => msg,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        loop {
            if stream.is_none() {
                stream = connect_with_retry(&host, port, &running);
            }
            let Some(s) = stream.as_mut() else { break };
            match wire::write_message(s, &msg.encode()) {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "mutation publish failed, reconnecting");
                    stream = None;
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_resolves_ports_from_base() {
        let client = ChpClient::new("127.0.0.1", 6000).unwrap();
        assert_eq!(client.layout.snapshot, 6000);
        assert_eq!(client.layout.publisher, 6001);
        assert_eq!(client.layout.collector, 6002);
    }

    #[test]
    fn publish_before_start_is_not_initialized() {
        let client = ChpClient::new("127.0.0.1", 6100).unwrap();
        assert_eq!(client.publish("k", "v"), Err(LagerError::NotInitialized));
    }

    #[test]
    fn fresh_client_is_not_timed_out() {
        let client = ChpClient::new("127.0.0.1", 6200).unwrap();
        assert!(!client.is_timed_out());
    }
}
