//! Control connection to a running emulator
//!
//! A [`ControlConnection`] owns one persistent stream to the scripting
//! server inside an emulator, plus the [`KeyState`] that stream currently
//! advertises. Every key transition is sent as a full snapshot.
//!
//! ```text
//!   disconnected ──connect()──▶ connecting ──ok──▶ connected
//!        ▲                          │                  │
//!        └──────── error ───────────┘                  │
//!        └──── disconnect() / send error / ping error ─┘
//! ```
//!
//! Reset and screenshot requests are fire-and-forget: the remote side never
//! answers, so callers pass the delay they want inserted after the request.

mod error;
mod transport;

pub use error::ConnectionError;
pub use transport::Transport;
#[cfg(test)]
pub(crate) use transport::is_timeout as is_receive_timeout;

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::input::{KeyEvent, KeyEventKind, KeyState};
use crate::protocol::{Frame, LineBuffer, PING};
use transport::Link;

const RECV_BUFFER_SIZE: usize = 1024;

/// A screenshot name fits in one frame only if it has no line breaks
pub fn is_valid_filename(filename: &str) -> bool {
    !filename.contains(['\n', '\r'])
}

/// Why [`ControlConnection::listen`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenEnd {
    /// The stop predicate asked for it
    Stopped,
    /// The remote side closed the stream
    PeerClosed,
    /// Keep-alive (or another sender) found the stream dead
    ConnectionLost,
}

struct KeepAlive {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Persistent control session with one emulator instance
pub struct ControlConnection {
    host: String,
    port: u16,
    config: ConnectionConfig,
    link: Arc<Link>,
    key_state: KeyState,
    keepalive: Option<KeepAlive>,
}

impl ControlConnection {
    /// A disconnected session for `host:port`
    pub fn new(host: impl Into<String>, port: u16, config: ConnectionConfig) -> Self {
        let host = host.into();
        let addr = format!("{}:{}", host, port);
        Self {
            host,
            port,
            config,
            link: Arc::new(Link::new(addr)),
            key_state: KeyState::new(),
            keepalive: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`
    pub fn addr(&self) -> &str {
        self.link.addr()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Keys this connection currently advertises as held
    pub fn key_state(&self) -> &KeyState {
        &self.key_state
    }

    /// Open the TCP stream.
    ///
    /// Tries each resolved address with the configured connect timeout. No
    /// retry happens here; a failed attempt leaves the connection
    /// disconnected and the caller decides whether to try again.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            tracing::debug!(addr = %self.addr(), "Already connected");
            return Ok(());
        }

        let connect_err = |source| ConnectionError::Connect {
            addr: self.addr().to_string(),
            source,
        };

        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(connect_err)?;

        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout()) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }

        let stream = match stream {
            Some(s) => s,
            None => {
                let source = last_err.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
                });
                tracing::warn!(addr = %self.addr(), error = %source, "Connection failed");
                return Err(connect_err(source));
            }
        };

        // Frames are tiny and timing-sensitive
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        self.attach(stream)?;
        tracing::info!(addr = %self.addr(), "Connected");
        Ok(())
    }

    /// Adopt an already-open transport and mark the session connected.
    ///
    /// Starts from an all-released key state.
    pub fn attach(&mut self, transport: impl Transport + 'static) -> Result<(), ConnectionError> {
        self.stop_keepalive();
        self.key_state.clear();
        self.link
            .install(Box::new(transport))
            .map_err(|source| ConnectionError::Connect {
                addr: self.addr().to_string(),
                source,
            })?;
        if self.config.keepalive_on_connect {
            self.start_keepalive();
        }
        Ok(())
    }

    /// Close the stream and stop keep-alive. Safe to call at any time.
    pub fn disconnect(&mut self) {
        self.stop_keepalive();
        let was_open = self.link.close();
        self.key_state.clear();
        if was_open {
            tracing::info!(addr = %self.addr(), "Disconnected");
        }
    }

    /// Send raw bytes.
    ///
    /// Fails with [`ConnectionError::NotConnected`] without touching any
    /// state when disconnected; a transport failure marks the connection
    /// disconnected.
    pub fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let result = self.link.send(bytes);
        match &result {
            Ok(()) => tracing::trace!(addr = %self.addr(), len = bytes.len(), "Sent"),
            Err(e) if e.is_not_connected() => tracing::debug!(%e, "Send skipped"),
            Err(e) => tracing::warn!(%e, "Send failed"),
        }
        result
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), ConnectionError> {
        tracing::debug!(addr = %self.addr(), ?frame, "Frame");
        self.send(&frame.encode())
    }

    fn send_key_state(&self) -> Result<(), ConnectionError> {
        self.send_frame(&self.key_state.frame())
    }

    /// Apply a key event and transmit the resulting snapshot(s).
    ///
    /// A push sends the held snapshot, sleeps for the full push duration,
    /// then sends the released snapshot. The sleep is the minimum press
    /// width the emulator-side poller needs to see both states.
    pub fn execute(&mut self, event: KeyEvent) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(self.link.not_connected());
        }

        match event.kind {
            KeyEventKind::Push(duration) => {
                self.key_state.set(event.key, true);
                let pressed = self.send_key_state();
                if pressed.is_ok() {
                    thread::sleep(duration);
                }
                self.key_state.set(event.key, false);
                pressed?;
                self.send_key_state()
            }
            KeyEventKind::Hold => {
                self.key_state.set(event.key, true);
                self.send_key_state()
            }
            KeyEventKind::Release => {
                self.key_state.set(event.key, false);
                self.send_key_state()
            }
        }
    }

    /// Ask the emulator to restart the session, then wait `settle`.
    pub fn reset(&self, settle: Duration) -> Result<(), ConnectionError> {
        self.send_frame(&Frame::Reset)?;
        thread::sleep(settle);
        Ok(())
    }

    /// Ask the emulator to write a screen capture to `filename` (a path on
    /// the emulator's side), then wait `settle`.
    ///
    /// Names containing a line break are rejected before anything is sent.
    pub fn save_screenshot(&self, filename: &str, settle: Duration) -> Result<(), ConnectionError> {
        if !is_valid_filename(filename) {
            return Err(ConnectionError::InvalidFilename {
                filename: filename.to_string(),
            });
        }
        self.send_frame(&Frame::Screenshot(filename.to_string()))?;
        thread::sleep(settle);
        Ok(())
    }

    /// Send one keep-alive ping now
    pub fn ping(&self) -> Result<(), ConnectionError> {
        self.send(PING)
    }

    /// Start the background ping worker if it isn't running.
    ///
    /// The worker pings every keep-alive interval while the connection is
    /// up; a failed ping marks the connection disconnected.
    pub fn start_keepalive(&mut self) {
        if self.keepalive.is_some() || !self.is_connected() {
            return;
        }

        let (stop, stop_rx) = mpsc::channel::<()>();
        let link = Arc::clone(&self.link);
        let interval = self.config.keepalive_interval();

        let spawned = thread::Builder::new()
            .name(format!("keepalive-{}", self.port))
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    if !link.is_connected() {
                        break;
                    }
                    if let Err(e) = link.send(PING) {
                        tracing::warn!(%e, "Keep-alive ping failed");
                        break;
                    }
                }
            });

        match spawned {
            Ok(handle) => self.keepalive = Some(KeepAlive { stop, handle }),
            Err(e) => tracing::warn!(error = %e, "Failed to spawn keep-alive worker"),
        }
    }

    fn stop_keepalive(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            let _ = keepalive.stop.send(());
            if keepalive.handle.join().is_err() {
                tracing::warn!(addr = %self.addr(), "Keep-alive worker panicked");
            }
        }
    }

    /// Receive lines until asked to stop or the connection dies.
    ///
    /// Starts keep-alive, then alternates bounded receives (receive timeout)
    /// with calls to `should_stop`. Each complete inbound line, trimmed of
    /// trailing whitespace, goes to `on_line`. The connection is always
    /// disconnected on return.
    pub fn listen<F, S>(&mut self, mut on_line: F, mut should_stop: S) -> Result<ListenEnd, ConnectionError>
    where
        F: FnMut(&str),
        S: FnMut() -> bool,
    {
        if !self.is_connected() {
            return Err(self.link.not_connected());
        }

        self.start_keepalive();
        tracing::info!(addr = %self.addr(), "Listening");

        let timeout = self.config.receive_timeout();
        let mut lines = LineBuffer::new();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        let result = loop {
            if !self.is_connected() {
                break Ok(ListenEnd::ConnectionLost);
            }
            if should_stop() {
                break Ok(ListenEnd::Stopped);
            }
            match self.link.receive(&mut buf, timeout) {
                Ok(None) => {}
                Ok(Some(0)) => break Ok(ListenEnd::PeerClosed),
                Ok(Some(n)) => {
                    lines.extend(&buf[..n]);
                    while let Some(line) = lines.next_line() {
                        on_line(&line);
                    }
                }
                Err(e) => {
                    tracing::warn!(%e, "Listen failed");
                    break Err(e);
                }
            }
        };

        self.disconnect();
        result
    }
}

impl Drop for ControlConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ControlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlConnection")
            .field("addr", &self.addr())
            .field("connected", &self.is_connected())
            .field("key_state", &self.key_state.encode_flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::KeyType;
    use crate::test_utils::{FrameServer, MockTransport, test_connection_config};
    use std::time::Instant;

    fn connected() -> (ControlConnection, crate::test_utils::MockHandle) {
        let (transport, handle) = MockTransport::new();
        let mut conn = ControlConnection::new("localhost", 8888, test_connection_config());
        conn.attach(transport).unwrap();
        (conn, handle)
    }

    #[test]
    fn test_push_sends_held_then_released_after_duration() {
        let (mut conn, handle) = connected();
        conn.execute(KeyEvent::hold(KeyType::B)).unwrap();
        handle.clear();

        conn.execute(KeyEvent::push_for(KeyType::A, Duration::from_millis(500)))
            .unwrap();

        let sends = handle.sends();
        assert_eq!(sends.len(), 2);
        let held = KeyType::A.bit() | KeyType::B.bit();
        assert_eq!(Frame::parse(&sends[0].1).unwrap(), Frame::KeyState(held));
        assert_eq!(
            Frame::parse(&sends[1].1).unwrap(),
            Frame::KeyState(KeyType::B.bit())
        );
        assert!(sends[1].0.duration_since(sends[0].0) >= Duration::from_millis(500));
        assert!(!conn.key_state().is_held(KeyType::A));
        assert!(conn.key_state().is_held(KeyType::B));
    }

    #[test]
    fn test_hold_and_release_send_one_frame_each() {
        let (mut conn, handle) = connected();

        conn.execute(KeyEvent::hold(KeyType::Up)).unwrap();
        assert_eq!(handle.frames(), vec![Frame::KeyState(KeyType::Up.bit())]);

        handle.clear();
        conn.execute(KeyEvent::release(KeyType::Up)).unwrap();
        assert_eq!(handle.frames(), vec![Frame::KeyState(0)]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut conn, handle) = connected();
        conn.disconnect();
        assert!(!conn.is_connected());
        assert!(handle.is_closed());

        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_send_while_disconnected_fails_without_state_change() {
        let mut conn = ControlConnection::new("localhost", 8888, test_connection_config());
        let err = conn.send(b"hello\n").unwrap_err();
        assert!(err.is_not_connected());
        assert!(!conn.is_connected());

        let err = conn.execute(KeyEvent::hold(KeyType::A)).unwrap_err();
        assert!(err.is_not_connected());
        assert_eq!(*conn.key_state(), KeyState::new());
    }

    #[test]
    fn test_send_failure_marks_disconnected() {
        let (mut conn, handle) = connected();
        handle.fail_sends();

        let err = conn.execute(KeyEvent::push_for(KeyType::A, Duration::from_secs(5)));
        assert!(matches!(err, Err(ConnectionError::Send { .. })));
        assert!(!conn.is_connected());
        assert!(!conn.key_state().is_held(KeyType::A));

        assert!(conn.send(b"x").unwrap_err().is_not_connected());
    }

    #[test]
    fn test_reset_and_screenshot_wait_for_settle() {
        let (conn, handle) = connected();

        let start = Instant::now();
        conn.reset(Duration::from_millis(50)).unwrap();
        conn.save_screenshot("temp/0.png", Duration::from_millis(50))
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        assert_eq!(
            handle.frames(),
            vec![Frame::Reset, Frame::Screenshot("temp/0.png".to_string())]
        );
    }

    #[test]
    fn test_screenshot_rejects_line_breaks() {
        let (conn, handle) = connected();

        for name in ["x\n\x02", "shot.png\r", "a\nping"] {
            let err = conn.save_screenshot(name, Duration::ZERO).unwrap_err();
            assert!(matches!(err, ConnectionError::InvalidFilename { .. }));
        }
        assert!(handle.sends().is_empty());
        assert!(conn.is_connected());
    }

    #[test]
    fn test_listen_delivers_trimmed_lines_until_stopped() {
        let (mut conn, handle) = connected();
        handle.push_inbound(b"0000");
        handle.push_inbound(b"000001 \r\n\nkeys: a\n");

        let mut received = Vec::new();
        let mut polls = 0;
        let end = conn
            .listen(
                |line| received.push(line.to_string()),
                || {
                    polls += 1;
                    polls > 5
                },
            )
            .unwrap();

        assert_eq!(end, ListenEnd::Stopped);
        assert_eq!(received, vec!["0000000001", "keys: a"]);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_listen_ends_when_peer_closes() {
        let (mut conn, handle) = connected();
        handle.push_inbound(b"bye\n");
        handle.close_inbound();

        let mut received = Vec::new();
        let end = conn.listen(|line| received.push(line.to_string()), || false).unwrap();
        assert_eq!(end, ListenEnd::PeerClosed);
        assert_eq!(received, vec!["bye"]);
    }

    #[test]
    fn test_keepalive_pings_and_failure_ends_listen() {
        let (mut conn, handle) = connected();
        conn.start_keepalive();
        std::thread::sleep(Duration::from_millis(120));
        assert!(handle.frames().contains(&Frame::Ping));

        handle.fail_sends();
        let end = conn.listen(|_| {}, || false).unwrap();
        assert_eq!(end, ListenEnd::ConnectionLost);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_keepalive_not_held_up_by_receive() {
        let (transport, handle) = MockTransport::new();
        let config = ConnectionConfig {
            receive_timeout_ms: 200,
            keepalive_interval_ms: 20,
            ..test_connection_config()
        };
        let mut conn = ControlConnection::new("localhost", 8888, config);
        conn.attach(transport).unwrap();

        let started = Instant::now();
        let end = conn
            .listen(|_| {}, || started.elapsed() >= Duration::from_millis(600))
            .unwrap();
        assert_eq!(end, ListenEnd::Stopped);

        let pings = handle.frames().iter().filter(|f| **f == Frame::Ping).count();
        assert!(pings >= 10, "only {} pings in 600ms", pings);
    }

    #[test]
    fn test_listen_requires_connection() {
        let mut conn = ControlConnection::new("localhost", 8888, test_connection_config());
        assert!(conn.listen(|_| {}, || true).unwrap_err().is_not_connected());
    }

    #[test]
    fn test_connect_over_tcp() {
        let server = FrameServer::start();
        let mut conn =
            ControlConnection::new("127.0.0.1", server.port(), test_connection_config());
        conn.connect().unwrap();
        assert!(conn.is_connected());

        conn.execute(KeyEvent::push_for(KeyType::Start, Duration::from_millis(20)))
            .unwrap();
        conn.disconnect();

        let frames = server.wait_for_frames(2, Duration::from_secs(2));
        assert_eq!(
            frames,
            vec![Frame::KeyState(KeyType::Start.bit()), Frame::KeyState(0)]
        );
    }

    #[test]
    fn test_connect_failure_stays_disconnected() {
        let port = crate::test_utils::unused_port();
        let mut conn = ControlConnection::new("127.0.0.1", port, test_connection_config());
        let err = conn.connect().unwrap_err();
        assert!(matches!(err, ConnectionError::Connect { .. }));
        assert!(!conn.is_connected());
    }
}
