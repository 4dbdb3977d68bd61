//! Byte transport underneath a control connection

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::ConnectionError;

/// A bidirectional byte stream to one emulator.
///
/// Implemented for [`TcpStream`]; tests substitute an in-memory recorder.
pub trait Transport: Send {
    /// Write every byte or fail
    fn send_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// A timeout is reported as [`io::ErrorKind::WouldBlock`] or
    /// [`io::ErrorKind::TimedOut`]; `Ok(0)` means the peer closed the stream.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// A second handle onto the same stream, so reads and writes can run
    /// from different threads.
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;

    /// Release the underlying handle. Errors are irrelevant at this point.
    fn close(&mut self) {}
}

impl Transport for TcpStream {
    fn send_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.set_read_timeout(Some(timeout))?;
        self.read(buf)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(TcpStream::try_clone(self)?))
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// True for the error kinds a receive timeout produces
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

type Slot = Mutex<Option<Box<dyn Transport>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Socket halves shared between a connection and its keep-alive worker.
///
/// Writes and reads go through separate handles, so a blocked receive never
/// delays a ping. `connected` is only ever true while both halves are held.
pub(crate) struct Link {
    addr: String,
    writer: Slot,
    reader: Slot,
    connected: AtomicBool,
}

impl Link {
    pub(crate) fn new(addr: String) -> Self {
        Self {
            addr,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Take over `transport`, closing whatever was installed before.
    pub(crate) fn install(&self, transport: Box<dyn Transport>) -> io::Result<()> {
        let reader = transport.try_clone()?;
        self.close();
        *lock(&self.writer) = Some(transport);
        *lock(&self.reader) = Some(reader);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Drop the stream. Returns whether one was open.
    pub(crate) fn close(&self) -> bool {
        self.mark_disconnected();
        let mut was_open = false;
        for slot in [&self.writer, &self.reader] {
            if let Some(mut transport) = lock(slot).take() {
                transport.close();
                was_open = true;
            }
        }
        was_open
    }

    pub(crate) fn not_connected(&self) -> ConnectionError {
        ConnectionError::NotConnected {
            addr: self.addr.clone(),
        }
    }

    /// Send one message; a transport failure flips the link to disconnected.
    pub(crate) fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(self.not_connected());
        }
        let mut slot = lock(&self.writer);
        let transport = slot.as_mut().ok_or_else(|| self.not_connected())?;
        transport.send_all(bytes).map_err(|source| {
            self.mark_disconnected();
            ConnectionError::Send {
                addr: self.addr.clone(),
                source,
            }
        })
    }

    /// One bounded receive. `Ok(None)` on timeout.
    pub(crate) fn receive(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, ConnectionError> {
        let mut slot = lock(&self.reader);
        let transport = slot.as_mut().ok_or_else(|| self.not_connected())?;
        match transport.receive(buf, timeout) {
            Ok(n) => Ok(Some(n)),
            Err(err) if is_timeout(&err) => Ok(None),
            Err(source) => {
                self.mark_disconnected();
                Err(ConnectionError::Receive {
                    addr: self.addr.clone(),
                    source,
                })
            }
        }
    }
}
