// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The forwarder: a stateless relay between tap publishers and mug
//! subscribers (`spec.md` §4.F).
//!
//! It never inspects a sample's contents; it only reads one multi-frame
//! message from the frontend and fans it out byte-for-byte to every
//! connected backend subscriber. Structured the same way as
//! `lager_core::chp::server`'s publisher worker (accept loop + per-client
//! channel registry), itself grounded on
//! `hdds-discovery-server/src/server/relay.rs`'s `RelayRouter`, but without
//! a heartbeat cadence: every frontend message is relayed the instant it
//! arrives rather than batched on a tick.

use lager_core::error::LagerError;
use lager_core::ports::PortLayout;
use lager_core::wire;
use std::collections::HashMap;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Default)]
struct BackendRegistry {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<Vec<Vec<u8>>>>,
}

impl BackendRegistry {
    fn register(&mut self) -> (u64, mpsc::Receiver<Vec<Vec<u8>>>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::channel();
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    fn unregister(&mut self, id: u64) {
        self.subscribers.remove(&id);
    }

    fn broadcast(&mut self, frames: &[Vec<u8>]) {
        self.subscribers
            .retain(|_, tx| tx.send(frames.to_vec()).is_ok());
    }
}

pub struct Forwarder {
    base_port: i32,
    running: Arc<AtomicBool>,
    listeners: Option<(TcpListener, TcpListener)>,
    workers: Vec<JoinHandle<()>>,
}

impl Forwarder {
    pub fn new(base_port: i32) -> Self {
        Self {
            base_port,
            running: Arc::new(AtomicBool::new(false)),
            listeners: None,
            workers: Vec::new(),
        }
    }

    pub fn init(&mut self) -> Result<(), LagerError> {
        let layout = PortLayout::resolve(self.base_port)?;
        let frontend = bind(layout.forwarder_frontend)?;
        let backend = bind(layout.forwarder_backend)?;
        self.listeners = Some((frontend, backend));
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), LagerError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(LagerError::AlreadyRunning);
        }
        let (frontend, backend) = self.listeners.take().ok_or(LagerError::NotInitialized)?;
        self.running.store(true, Ordering::SeqCst);

        let registry = Arc::new(Mutex::new(BackendRegistry::default()));

        let running = self.running.clone();
        let backend_registry = registry.clone();
        let backend_handle =
            thread::spawn(move || backend_acceptor(backend, backend_registry, running));

        let running = self.running.clone();
        let frontend_handle = thread::spawn(move || frontend_acceptor(frontend, registry, running));

        self.workers = vec![frontend_handle, backend_handle];
        info!(base_port = self.base_port, "forwarder started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Forwarder {
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

fn frontend_acceptor(listener: TcpListener, registry: Arc<Mutex<BackendRegistry>>, running: Arc<AtomicBool>) {
    listener.set_nonblocking(true).ok();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let registry = registry.clone();
                let running = running.clone();
                thread::spawn(move || serve_publisher(stream, registry, running));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_SLICE),
            Err(e) => {
                warn!(error = %e, "forwarder frontend accept error");
                thread::sleep(POLL_SLICE);
            }
        }
    }
}

fn serve_publisher(mut stream: TcpStream, registry: Arc<Mutex<BackendRegistry>>, running: Arc<AtomicBool>) {
    stream.set_read_timeout(Some(POLL_SLICE)).ok();
    while running.load(Ordering::SeqCst) {
        match wire::read_message(&mut stream) {
            Ok(frames) => registry.lock().unwrap().broadcast(&frames),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => break,
        }
    }
}

fn backend_acceptor(listener: TcpListener, registry: Arc<Mutex<BackendRegistry>>, running: Arc<AtomicBool>) {
    listener.set_nonblocking(true).ok();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let (id, rx) = registry.lock().unwrap().register();
                let registry = registry.clone();
                let running = running.clone();
                thread::spawn(move || {
                    run_backend_writer(stream, rx, &running);
                    registry.lock().unwrap().unregister(id);
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_SLICE),
            Err(e) => {
                warn!(error = %e, "forwarder backend accept error");
                thread::sleep(POLL_SLICE);
            }
        }
    }
}

fn run_backend_writer(mut stream: TcpStream, rx: mpsc::Receiver<Vec<Vec<u8>>>, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_SLICE) {
            Ok(frames) => {
                if wire::write_message(&mut stream, &frames).is_err() {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("backend subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdTcpStream;

    #[test]
    fn uninitialized_start_fails() {
        let mut fwd = Forwarder::new(0);
        assert_eq!(fwd.start(), Err(LagerError::NotInitialized));
    }

    #[test]
    fn relays_a_message_from_frontend_to_backend() {
        let mut fwd = Forwarder::new(17900);
        fwd.init().unwrap();
        fwd.start().unwrap();

        let layout = PortLayout::resolve(17900).unwrap();
        let mut backend = StdTcpStream::connect(("127.0.0.1", layout.forwarder_backend)).unwrap();
        thread::sleep(Duration::from_millis(150));

        let mut frontend = StdTcpStream::connect(("127.0.0.1", layout.forwarder_frontend)).unwrap();
        wire::write_message(&mut frontend, &[b"hello".to_vec()]).unwrap();

        backend.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let frames = wire::read_message(&mut backend).unwrap();
        assert_eq!(frames, vec![b"hello".to_vec()]);

        fwd.stop();
    }
}
