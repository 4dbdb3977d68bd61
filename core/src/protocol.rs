//! Control line protocol
//!
//! One persistent byte stream per emulator instance. Every outbound message
//! is a single newline-terminated line whose first byte selects its meaning:
//!
//! ```text
//! \x01<decimal bitmask>\n   full keystate snapshot
//! \x02\n                    restart the emulated session
//! \x03<filename>\n          write a screen capture to <filename>
//! ping\n                    keep-alive, ignored by the remote side
//! ```
//!
//! Nothing is acknowledged. The remote side processes lines in the order
//! they arrive and may push its own lines back (for example, key echoes).

/// Leading byte of a keystate snapshot
pub const KEYSTATE_CTRL: u8 = 0x01;
/// Leading byte of a session reset request
pub const RESET_CTRL: u8 = 0x02;
/// Leading byte of a screenshot request
pub const SCREENSHOT_CTRL: u8 = 0x03;
/// Keep-alive literal
pub const PING: &[u8] = b"ping\n";

/// Upper bound on a buffered inbound line before it is force-flushed
const MAX_LINE_LEN: usize = 64 * 1024;

/// A single protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    KeyState(u16),
    Reset,
    Screenshot(String),
    Ping,
}

/// A line that is not a valid frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("invalid keystate bitmask '{0}'")]
    InvalidBitmask(String),
    #[error("screenshot frame without a filename")]
    MissingFilename,
    #[error("unknown frame {0:?}")]
    Unknown(String),
}

impl Frame {
    /// Wire bytes, including the trailing newline
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::KeyState(mask) => {
                let mut bytes = vec![KEYSTATE_CTRL];
                bytes.extend_from_slice(mask.to_string().as_bytes());
                bytes.push(b'\n');
                bytes
            }
            Frame::Reset => vec![RESET_CTRL, b'\n'],
            Frame::Screenshot(filename) => {
                let mut bytes = vec![SCREENSHOT_CTRL];
                bytes.extend_from_slice(filename.as_bytes());
                bytes.push(b'\n');
                bytes
            }
            Frame::Ping => PING.to_vec(),
        }
    }

    /// Parse one line, with or without its trailing newline.
    ///
    /// This is the emulator side of the protocol; the controller only
    /// encodes. It exists so tests and local tooling can stand in for the
    /// emulator script.
    pub fn parse(line: &[u8]) -> Result<Frame, FrameError> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let (&ctrl, rest) = line.split_first().ok_or(FrameError::Empty)?;
        let rest = String::from_utf8_lossy(rest);

        match ctrl {
            KEYSTATE_CTRL => rest
                .parse::<u16>()
                .map(Frame::KeyState)
                .map_err(|_| FrameError::InvalidBitmask(rest.into_owned())),
            RESET_CTRL if rest.is_empty() => Ok(Frame::Reset),
            SCREENSHOT_CTRL if rest.is_empty() => Err(FrameError::MissingFilename),
            SCREENSHOT_CTRL => Ok(Frame::Screenshot(rest.into_owned())),
            _ if line == &PING[..PING.len() - 1] => Ok(Frame::Ping),
            _ => Err(FrameError::Unknown(String::from_utf8_lossy(line).into_owned())),
        }
    }
}

/// Splits an inbound byte stream into lines.
///
/// Bytes may arrive split anywhere; a line is only yielded once its newline
/// has been seen. Lines are decoded lossily and trimmed of trailing
/// whitespace; blank lines are dropped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete, non-blank line
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = match self.pending.iter().position(|&b| b == b'\n') {
                Some(pos) => pos,
                None if self.pending.len() >= MAX_LINE_LEN => self.pending.len() - 1,
                None => return None,
            };
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Drain every complete line
    pub fn lines(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_line()).collect()
    }
}
