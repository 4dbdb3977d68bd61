//! Shared test utilities for integration and unit tests

use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ConnectionConfig;
use crate::connection::Transport;
use crate::protocol::{Frame, LineBuffer};

/// Short timeouts so listen loops and keep-alive tick quickly in tests
pub fn test_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        connect_timeout_ms: 1000,
        receive_timeout_ms: 10,
        keepalive_interval_ms: 30,
        keepalive_on_connect: false,
    }
}

/// A port nothing is listening on (at the time of the call)
pub fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Mock Transport
// ============================================================================

#[derive(Default)]
struct MockShared {
    sends: Mutex<Vec<(Instant, Vec<u8>)>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    inbound_closed: AtomicBool,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

/// In-memory transport that timestamps every send
pub struct MockTransport {
    shared: Arc<MockShared>,
}

/// Test-side view of a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let shared = Arc::new(MockShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockHandle { shared },
        )
    }
}

impl Transport for MockTransport {
    fn send_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock send failure"));
        }
        self.shared
            .sends
            .lock()
            .unwrap()
            .push((Instant::now(), bytes.to_vec()));
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if let Some(chunk) = self.shared.inbound.lock().unwrap().pop_front() {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            return Ok(n);
        }
        if self.shared.inbound_closed.load(Ordering::SeqCst) {
            return Ok(0);
        }
        thread::sleep(timeout);
        Err(io::Error::new(io::ErrorKind::WouldBlock, "mock timeout"))
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(Self {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn close(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

impl MockHandle {
    /// Every send with its timestamp
    pub fn sends(&self) -> Vec<(Instant, Vec<u8>)> {
        self.shared.sends.lock().unwrap().clone()
    }

    /// Every send, parsed
    pub fn frames(&self) -> Vec<Frame> {
        self.sends()
            .iter()
            .map(|(_, bytes)| Frame::parse(bytes).unwrap())
            .collect()
    }

    pub fn clear(&self) {
        self.shared.sends.lock().unwrap().clear();
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.shared.inbound.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Report end-of-stream once queued inbound data is drained
    pub fn close_inbound(&self) {
        self.shared.inbound_closed.store(true, Ordering::SeqCst);
    }

    /// Make every following send fail
    pub fn fail_sends(&self) {
        self.shared.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Frame Server
// ============================================================================

/// Stand-in for the emulator-side scripting server.
///
/// Accepts any number of connections and records every frame received.
pub struct FrameServer {
    port: u16,
    frames: Arc<Mutex<Vec<Frame>>>,
    connections: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl FrameServer {
    /// Listen on an ephemeral port
    pub fn start() -> Self {
        Self::from_listener(TcpListener::bind("127.0.0.1:0").unwrap())
    }

    /// `count` servers on consecutive ports. Returns the first port.
    pub fn consecutive(count: usize) -> (u16, Vec<FrameServer>) {
        if count == 0 {
            return (unused_port(), Vec::new());
        }
        for base in (20_000u16..60_000).step_by(97) {
            let listeners: io::Result<Vec<TcpListener>> = (0..count)
                .map(|i| TcpListener::bind(("127.0.0.1", base + i as u16)))
                .collect();
            if let Ok(listeners) = listeners {
                let servers = listeners.into_iter().map(Self::from_listener).collect();
                return (base, servers);
            }
        }
        panic!("no run of {} free ports", count);
    }

    fn from_listener(listener: TcpListener) -> Self {
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let frames = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let accept_thread = {
            let frames = Arc::clone(&frames);
            let connections = Arc::clone(&connections);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            connections.fetch_add(1, Ordering::SeqCst);
                            let frames = Arc::clone(&frames);
                            let stop = Arc::clone(&stop);
                            thread::spawn(move || serve(stream, frames, stop));
                        }
                        Err(_) => thread::sleep(Duration::from_millis(5)),
                    }
                }
            })
        };

        Self {
            port,
            frames,
            connections,
            stop,
            accept_thread: Some(accept_thread),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Block until at least `count` frames arrived or `timeout` passed
    pub fn wait_for_frames(&self, count: usize, timeout: Duration) -> Vec<Frame> {
        let start = Instant::now();
        while self.frames.lock().unwrap().len() < count && start.elapsed() < timeout {
            thread::sleep(Duration::from_millis(5));
        }
        self.frames()
    }
}

fn serve(mut stream: TcpStream, frames: Arc<Mutex<Vec<Frame>>>, stop: Arc<AtomicBool>) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(20)));
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                lines.extend(&buf[..n]);
                while let Some(line) = lines.next_line() {
                    if let Ok(frame) = Frame::parse(line.as_bytes()) {
                        frames.lock().unwrap().push(frame);
                    }
                }
            }
            Err(e) if crate::connection::is_receive_timeout(&e) => {}
            Err(_) => break,
        }
    }
}

impl Drop for FrameServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Processes
// ============================================================================

/// A long-running stand-in for the emulator binary: `sleep <secs>`
#[cfg(unix)]
pub fn sleeper(secs: u32) -> crate::process::EmulatorProcess {
    crate::process::EmulatorProcess::new("sleep", secs.to_string(), Vec::new())
}

/// A process that exits immediately: `true <content>`
#[cfg(unix)]
pub fn short_lived() -> crate::process::EmulatorProcess {
    crate::process::EmulatorProcess::new("true", "0", Vec::new())
}
